//! Rotating browser User-Agent strings for outbound requests

use std::sync::atomic::{AtomicUsize, Ordering};

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.0 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/88.0.4324.96 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:89.0) Gecko/20100101 Firefox/89.0",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 14_6 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.1 Mobile/15E148 Safari/604.1",
];

static NEXT: AtomicUsize = AtomicUsize::new(0);

/// Next User-Agent in round-robin order
pub fn next_user_agent() -> &'static str {
    let i = NEXT.fetch_add(1, Ordering::Relaxed);
    USER_AGENTS[i % USER_AGENTS.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agents_rotate_through_known_set() {
        for _ in 0..USER_AGENTS.len() * 2 {
            let ua = next_user_agent();
            assert!(USER_AGENTS.contains(&ua));
            assert!(ua.starts_with("Mozilla/5.0"));
        }
    }
}
