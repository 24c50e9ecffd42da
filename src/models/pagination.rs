pub const DEFAULT_PAGE: i64 = 1;
pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: i64,
    pub page_size: i64,
}

impl Pagination {
    /// Non-positive values fall back to defaults; the page size is capped.
    pub fn normalized(page: i64, page_size: i64) -> Self {
        let page = if page <= 0 { DEFAULT_PAGE } else { page };
        let page_size = if page_size <= 0 {
            DEFAULT_PAGE_SIZE
        } else {
            page_size.min(MAX_PAGE_SIZE)
        };
        Self { page, page_size }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.page_size
    }

    /// A full page hints at more rows; the consumer confirms by fetching the
    /// next page.
    pub fn has_next(&self, returned: usize) -> bool {
        returned as i64 == self.page_size
    }
}
