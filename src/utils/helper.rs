//! Pagination, random string and naming helpers.

use chrono::Local;
use rand::distributions::{Alphanumeric, Uniform};
use rand::Rng;

/// Row offset for a 1-based page. Pages below 1 are treated as the first page.
pub fn page_offset(page: i64, page_size: i64) -> i64 {
    let page = if page <= 0 { 1 } else { page };
    (page - 1).saturating_mul(page_size)
}

/// Random string of `len` characters drawn from `[a-zA-Z0-9]`.
pub fn generate_random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Random string of `len` decimal digits. Leading zeros are allowed.
pub fn generate_random_number(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(Uniform::new_inclusive(b'0', b'9'))
        .take(len)
        .map(char::from)
        .collect()
}

/// Path of the form `YYYY-MM-DD/<random><unix millis><ext>`, dated in local time.
pub fn generate_date_file_path(len: usize, ext: &str) -> String {
    let now = Local::now();
    format!(
        "{}/{}{}{}",
        now.format("%Y-%m-%d"),
        generate_random_string(len),
        now.timestamp_millis(),
        ext
    )
}

/// Short, human-readable name of a function or closure for log lines.
///
/// Uses the compile-time type name, so closures render as
/// `outer::{{closure}}` and generic parameters are dropped.
pub fn func_name<F>(_: &F) -> &'static str {
    let full = std::any::type_name::<F>();
    let base = full.split('<').next().unwrap_or(full);
    match base.rfind("::") {
        Some(idx) if base[idx + 2..].starts_with('{') => {
            let owner = &base[..idx];
            let start = owner.rfind("::").map(|i| i + 2).unwrap_or(0);
            &base[start..]
        }
        Some(idx) => &base[idx + 2..],
        None => base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list_orders() {}

    #[test]
    fn test_page_offset() {
        assert_eq!(page_offset(1, 20), 0);
        assert_eq!(page_offset(3, 20), 40);
        assert_eq!(page_offset(0, 20), 0);
        assert_eq!(page_offset(-4, 20), 0);
        assert_eq!(page_offset(i64::MAX, 20), i64::MAX);
        assert_eq!(page_offset(i64::MAX, -20), i64::MIN);
    }

    #[test]
    fn test_random_string_charset() {
        let s = generate_random_string(64);
        assert_eq!(s.len(), 64);
        assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(generate_random_string(0).is_empty());
    }

    #[test]
    fn test_random_number_digits() {
        let n = generate_random_number(12);
        assert_eq!(n.len(), 12);
        assert!(n.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_date_file_path_layout() {
        let path = generate_date_file_path(6, ".png");
        let (dir, file) = path.split_once('/').unwrap();
        assert_eq!(dir.len(), 10);
        assert_eq!(&dir[4..5], "-");
        assert!(file.ends_with(".png"));
        // 6 random chars + 13 digit millis + ext
        assert_eq!(file.len(), 6 + 13 + 4);
    }

    #[test]
    fn test_func_name() {
        assert_eq!(func_name(&list_orders), "list_orders");
        assert_eq!(func_name(&page_offset), "page_offset");
        let handler = || ();
        assert_eq!(func_name(&handler), "test_func_name::{{closure}}");
    }
}
