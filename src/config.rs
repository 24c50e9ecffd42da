use std::env;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub db: DbConfig,
    pub jwt: JwtConfig,
}

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub ttl_seconds: i64,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let secret = env::var("JWT_SECRET")
            .map_err(|_| AppError::Infrastructure("JWT_SECRET is not set".to_string()))?;

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db: DbConfig {
                host: string_or_default("DB_HOST", "localhost"),
                port: parse_or_default("DB_PORT", 5432)?,
                user: string_or_default("DB_USER", "postgres"),
                password: string_or_default("DB_PASSWORD", ""),
                name: string_or_default("DB_NAME", "drone_dispatch"),
            },
            jwt: JwtConfig {
                secret,
                ttl_seconds: parse_or_default("JWT_TTL", 3600)?,
                issuer: non_empty(env::var("JWT_ISSUER").ok()),
                audience: non_empty(env::var("JWT_AUDIENCE").ok()),
            },
        })
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Infrastructure(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}

fn string_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
