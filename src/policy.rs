//! Restart policy - decides what happens after a child exits.

use std::time::Duration;

/// Outcome of evaluating the restart policy for one exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// Let the child stay dead
    Terminate,
    /// Respawn right away
    Restart,
    /// Respawn once the delay has passed
    RestartAfter(Duration),
}

/// Inputs to the restart policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExitContext {
    /// Number of exits observed so far, including this one
    pub times: u32,
    /// Spawn cap, `None` for unlimited
    pub max: Option<u32>,
    /// The child died before reaching its minimum uptime
    pub spinning: bool,
    /// Cooldown before restarting a spinning child
    pub spin_sleep_time: Option<Duration>,
    /// `stop()` was requested
    pub force_stop: bool,
    /// `restart()` was requested
    pub force_restart: bool,
}

/// Whether a child that ran for `uptime` counts as spinning.
pub fn is_spinning(uptime: Duration, min_uptime: Duration) -> bool {
    uptime < min_uptime
}

/// Evaluate the restart policy. The first matching rule wins:
///
/// 1. a forced stop always terminates
/// 2. reaching `max` terminates unless a restart was forced
/// 3. spinning without a cooldown terminates unless a restart was forced
/// 4. spinning with a cooldown restarts after the cooldown
/// 5. anything else restarts immediately
pub fn decide(ctx: &ExitContext) -> RestartDecision {
    if ctx.force_stop {
        return RestartDecision::Terminate;
    }

    let exhausted = ctx.max.map_or(false, |max| ctx.times >= max);
    if exhausted && !ctx.force_restart {
        return RestartDecision::Terminate;
    }

    if ctx.spinning {
        return match ctx.spin_sleep_time {
            Some(delay) => RestartDecision::RestartAfter(delay),
            None if ctx.force_restart => RestartDecision::Restart,
            None => RestartDecision::Terminate,
        };
    }

    RestartDecision::Restart
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ExitContext {
        ExitContext {
            times: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_healthy_exit_restarts() {
        assert_eq!(decide(&ctx()), RestartDecision::Restart);
    }

    #[test]
    fn test_force_stop_wins() {
        let c = ExitContext {
            force_stop: true,
            force_restart: true,
            spin_sleep_time: Some(Duration::from_millis(10)),
            ..ctx()
        };
        assert_eq!(decide(&c), RestartDecision::Terminate);
    }

    #[test]
    fn test_max_reached_terminates() {
        for max in 1..6 {
            for times in 0..10 {
                let c = ExitContext {
                    times,
                    max: Some(max),
                    ..Default::default()
                };
                let expected = if times >= max {
                    RestartDecision::Terminate
                } else {
                    RestartDecision::Restart
                };
                assert_eq!(decide(&c), expected, "times={} max={}", times, max);
            }
        }
    }

    #[test]
    fn test_max_overridden_by_forced_restart() {
        let c = ExitContext {
            times: 5,
            max: Some(3),
            force_restart: true,
            ..Default::default()
        };
        assert_eq!(decide(&c), RestartDecision::Restart);
    }

    #[test]
    fn test_spinning_without_sleep_terminates() {
        let c = ExitContext {
            spinning: true,
            ..ctx()
        };
        assert_eq!(decide(&c), RestartDecision::Terminate);

        let forced = ExitContext {
            force_restart: true,
            ..c
        };
        assert_eq!(decide(&forced), RestartDecision::Restart);
    }

    #[test]
    fn test_spinning_with_sleep_delays() {
        let c = ExitContext {
            spinning: true,
            spin_sleep_time: Some(Duration::from_millis(200)),
            ..ctx()
        };
        assert_eq!(
            decide(&c),
            RestartDecision::RestartAfter(Duration::from_millis(200))
        );
    }

    #[test]
    fn test_is_spinning() {
        assert!(is_spinning(Duration::from_millis(10), Duration::from_secs(5)));
        assert!(!is_spinning(Duration::from_secs(6), Duration::from_secs(5)));
        assert!(!is_spinning(Duration::ZERO, Duration::ZERO));
    }
}
