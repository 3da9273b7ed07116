use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_LIMIT: u32 = 24;

fn default_limit() -> u32 {
    DEFAULT_PAGE_LIMIT
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

impl Pagination {
    pub fn new(limit: u32, offset: u32) -> Self {
        Self { limit, offset }
    }

    /// Exclusive end of the requested window.
    pub fn end(&self) -> u64 {
        self.offset as u64 + self.limit as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageInfo {
    pub limit: u32,
    pub offset: u32,
    pub has_next: bool,
    pub has_prev: bool,
}

impl PageInfo {
    pub fn new(pagination: Pagination, total_count: u64) -> Self {
        Self {
            limit: pagination.limit,
            offset: pagination.offset,
            has_next: pagination.end() < total_count,
            has_prev: pagination.offset > 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub total_count: u64,
    pub page_info: PageInfo,
    pub results: Vec<T>,
}

impl<T> Page<T> {
    pub fn new(results: Vec<T>, total_count: u64, pagination: Pagination) -> Self {
        Self {
            total_count,
            page_info: PageInfo::new(pagination, total_count),
            results,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            total_count: self.total_count,
            page_info: self.page_info,
            results: self.results.into_iter().map(f).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_info_flags() {
        let info = PageInfo::new(Pagination::new(10, 0), 25);
        assert!(info.has_next);
        assert!(!info.has_prev);

        let info = PageInfo::new(Pagination::new(10, 20), 25);
        assert!(!info.has_next);
        assert!(info.has_prev);

        // Exactly consumed
        let info = PageInfo::new(Pagination::new(10, 10), 20);
        assert!(!info.has_next);
    }

    #[test]
    fn test_pagination_defaults_from_json() {
        let p: Pagination = serde_json::from_str("{}").unwrap();
        assert_eq!(p, Pagination::new(24, 0));

        let p: Pagination = serde_json::from_str(r#"{"offset": 48}"#).unwrap();
        assert_eq!(p, Pagination::new(24, 48));
    }
}
