// Utility functions

pub mod logger;
pub mod retry;

pub use logger::*;
pub use retry::*;

/// Case- and whitespace-normalized identity used for entity names.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  Notion "), "notion");
        assert_eq!(normalize_name("Monday.com   Work  OS"), "monday.com work os");
        assert_eq!(normalize_name("ASANA"), normalize_name("asana"));
    }
}
