//! 上传文件命名：文件名清洗与单调毫秒时间戳。

use chrono::Utc;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::config::MAX_SANITIZED_NAME_LEN;

const FALLBACK_NAME: &str = "upload";

/// 落盘使用的安全文件名：`<stamp>_<sanitized>`。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SafeFileName(String);

impl SafeFileName {
    pub fn new(stamp: i64, original: &str) -> Self {
        Self(format!("{stamp}_{}", sanitize_file_name(original)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for SafeFileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 清洗客户端提供的文件名。
///
/// `[A-Za-z0-9.-]` 以外的字符（含路径分隔符）替换为 `_`，
/// 连续的 `.` 从第二个起替换为 `_`，过长时保留末尾部分（扩展名）。
pub fn sanitize_file_name(original: &str) -> String {
    let mut sanitized = String::with_capacity(original.len());
    let mut prev_dot = false;
    for c in original.chars() {
        let keep = c.is_ascii_alphanumeric() || c == '-' || (c == '.' && !prev_dot);
        prev_dot = c == '.';
        sanitized.push(if keep { c } else { '_' });
    }

    if sanitized.is_empty() {
        return FALLBACK_NAME.to_string();
    }
    if sanitized.len() > MAX_SANITIZED_NAME_LEN {
        // only ASCII remains, so byte offsets are char boundaries
        sanitized = sanitized[sanitized.len() - MAX_SANITIZED_NAME_LEN..].to_string();
    }
    sanitized
}

/// 进程内单调递增的毫秒时间戳，同一毫秒内的请求顺延到下一个值。
#[derive(Debug, Default)]
pub struct StampClock {
    last: AtomicI64,
}

impl StampClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从给定值之后开始计时，便于测试中得到确定的时间戳。
    #[cfg(test)]
    pub fn starting_at(last: i64) -> Self {
        Self {
            last: AtomicI64::new(last),
        }
    }

    pub fn next(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let mut prev = self.last.load(Ordering::Acquire);
        loop {
            let candidate = now.max(prev + 1);
            match self.last.compare_exchange_weak(
                prev,
                candidate,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return candidate,
                Err(actual) => prev = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn only_safe_chars(value: &str) -> bool {
        value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_')
    }

    #[test]
    fn sanitize_replaces_spaces() {
        assert_eq!(sanitize_file_name("a b.jpg"), "a_b.jpg");
        assert_eq!(sanitize_file_name("photo-1.PNG"), "photo-1.PNG");
    }

    #[test]
    fn sanitize_replaces_separators_and_breaks_dot_runs() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "._._etc_passwd");
        assert_eq!(sanitize_file_name("photos/a b.jpg"), "photos_a_b.jpg");
        assert_eq!(sanitize_file_name("a\\b.png"), "a_b.png");
        assert_eq!(sanitize_file_name("C:\\fakepath\\cat.png"), "C__fakepath_cat.png");
        assert_eq!(sanitize_file_name(".."), "._");
        assert_eq!(sanitize_file_name("a...b.jpg"), "a.__b.jpg");
        assert_eq!(sanitize_file_name("dir/"), "dir_");
        assert_eq!(sanitize_file_name(""), "upload");
    }

    #[test]
    fn sanitized_names_never_contain_separators_or_dot_runs() {
        let samples = [
            "naïve résumé.jpg",
            "x/../../y.png",
            "..\\..\\boot.ini",
            "emoji 🐈.jpeg",
            "tab\tand\nnewline.png",
            "....",
            "%2e%2e%2fsecret",
        ];
        for sample in samples {
            let name = SafeFileName::new(1_700_000_000_000, sample);
            let name = name.as_str();
            assert!(only_safe_chars(name), "{name}");
            assert!(!name.contains(".."), "{name}");
            let (stamp, _) = name.split_once('_').expect("stamp separator");
            assert!(stamp.chars().all(|c| c.is_ascii_digit()), "{name}");
        }
    }

    #[test]
    fn sanitize_keeps_extension_of_long_names() {
        let long = format!("{}.png", "a".repeat(500));
        let sanitized = sanitize_file_name(&long);
        assert_eq!(sanitized.len(), MAX_SANITIZED_NAME_LEN);
        assert!(sanitized.ends_with(".png"));
    }

    #[test]
    fn stamp_clock_is_strictly_increasing() {
        let clock = StampClock::new();
        let mut prev = clock.next();
        for _ in 0..1000 {
            let next = clock.next();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn stamp_clock_is_unique_across_threads() {
        let clock = Arc::new(StampClock::new());
        let handles = (0..4)
            .map(|_| {
                let clock = clock.clone();
                std::thread::spawn(move || (0..250).map(|_| clock.next()).collect::<Vec<_>>())
            })
            .collect::<Vec<_>>();
        let mut seen = HashSet::new();
        for handle in handles {
            for stamp in handle.join().expect("thread") {
                assert!(seen.insert(stamp), "duplicate stamp {stamp}");
            }
        }
    }
}
