use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

/// Rolling-window admission control for one source. Rejecting locally costs
/// nothing; letting the provider reject remotely still burns quota.
pub struct QuotaGuard {
    state: Mutex<WindowState>,
    max_requests: u32,
    window: Duration,
}

struct WindowState {
    window_start: Instant,
    used: u32,
}

impl QuotaGuard {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            state: Mutex::new(WindowState {
                window_start: Instant::now(),
                used: 0,
            }),
            max_requests,
            window,
        }
    }

    /// Admit one request if the current window has room. The counter rolls
    /// over once the window has fully elapsed.
    pub fn try_acquire(&self) -> bool {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();
        if now.duration_since(state.window_start) >= self.window {
            state.window_start = now;
            state.used = 0;
        }
        if state.used >= self.max_requests {
            return false;
        }
        state.used += 1;
        true
    }

    pub fn remaining(&self) -> u32 {
        let state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state.window_start.elapsed() >= self.window {
            return self.max_requests;
        }
        self.max_requests.saturating_sub(state.used)
    }
}

/// One guard per source, created lazily from config. Each guard carries its
/// own mutex so accounting for one source never blocks another.
#[derive(Default)]
pub struct QuotaRegistry {
    guards: Mutex<HashMap<String, std::sync::Arc<QuotaGuard>>>,
}

impl QuotaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn guard(
        &self,
        source: &str,
        max_requests: u32,
        window: Duration,
    ) -> std::sync::Arc<QuotaGuard> {
        let mut guards = match self.guards.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guards
            .entry(source.to_string())
            .or_insert_with(|| std::sync::Arc::new(QuotaGuard::new(max_requests, window)))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_the_limit_then_rejects() {
        let guard = QuotaGuard::new(3, Duration::from_secs(60));
        assert!(guard.try_acquire());
        assert!(guard.try_acquire());
        assert!(guard.try_acquire());
        assert!(!guard.try_acquire());
        assert_eq!(guard.remaining(), 0);
    }

    #[test]
    fn window_rollover_resets_the_counter() {
        let guard = QuotaGuard::new(1, Duration::from_millis(20));
        assert!(guard.try_acquire());
        assert!(!guard.try_acquire());
        std::thread::sleep(Duration::from_millis(30));
        assert!(guard.try_acquire());
    }

    #[test]
    fn registry_returns_the_same_guard_per_source() {
        let registry = QuotaRegistry::new();
        let a = registry.guard("virustotal", 4, Duration::from_secs(60));
        let b = registry.guard("virustotal", 4, Duration::from_secs(60));
        assert!(a.try_acquire());
        assert_eq!(b.remaining(), 3);
    }

    #[test]
    fn guards_are_safe_under_concurrent_acquisition() {
        let guard = std::sync::Arc::new(QuotaGuard::new(50, Duration::from_secs(60)));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let guard = guard.clone();
            handles.push(std::thread::spawn(move || {
                let mut admitted = 0u32;
                for _ in 0..20 {
                    if guard.try_acquire() {
                        admitted += 1;
                    }
                }
                admitted
            }));
        }
        let total: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 50);
    }
}
