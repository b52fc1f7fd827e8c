// Reconnection logic with bounded exponential backoff

use std::time::Duration;

/// Backoff settings for bus reconnection
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// First retry delay
    pub base_delay_ms: u64,
    /// Cap applied to each individual delay
    pub max_delay_ms: u64,
    /// Total backoff budget before the link is declared failed
    pub max_elapsed_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,  // 1 second de base
            max_delay_ms: 4000,   // 4 secondes max entre deux tentatives
            max_elapsed_ms: 10_000, // abandon après 10 secondes
        }
    }
}

pub struct ReconnectionStrategy {
    config: ReconnectConfig,
    current_attempt: u32,
    elapsed_ms: u64,
}

impl ReconnectionStrategy {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            current_attempt: 0,
            elapsed_ms: 0,
        }
    }

    /// Calcule le délai pour la prochaine tentative (backoff exponentiel)
    ///
    /// Returns `None` once the accumulated delays reach the elapsed ceiling.
    /// The last delay is clipped so the total never exceeds it.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }

        // Backoff exponentiel: base * 2^attempt
        let factor = 2u64.saturating_pow(self.current_attempt);
        let delay_ms = self
            .config
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.config.max_delay_ms)
            .min(self.config.max_elapsed_ms - self.elapsed_ms);

        self.current_attempt += 1;
        self.elapsed_ms += delay_ms;

        Some(Duration::from_millis(delay_ms))
    }

    /// Réinitialise le compteur de tentatives (après succès)
    pub fn reset(&mut self) {
        self.current_attempt = 0;
        self.elapsed_ms = 0;
    }

    /// Indique si on doit encore tenter de se reconnecter
    pub fn should_retry(&self) -> bool {
        self.elapsed_ms < self.config.max_elapsed_ms
    }

    pub fn current_attempt(&self) -> u32 {
        self.current_attempt
    }

    /// Sum of all delays handed out since the last reset
    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }
}

impl Default for ReconnectionStrategy {
    fn default() -> Self {
        Self::new(ReconnectConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff() {
        let mut strategy = ReconnectionStrategy::default();

        // Premier délai: 1s
        assert_eq!(strategy.next_delay(), Some(Duration::from_millis(1000)));

        // Deuxième: 2s
        assert_eq!(strategy.next_delay(), Some(Duration::from_millis(2000)));

        // Troisième: 4s (plafond)
        assert_eq!(strategy.next_delay(), Some(Duration::from_millis(4000)));

        // Quatrième: coupé à 3s pour rester sous 10s au total
        assert_eq!(strategy.next_delay(), Some(Duration::from_millis(3000)));

        assert_eq!(strategy.next_delay(), None);
        assert_eq!(strategy.elapsed(), Duration::from_secs(10));
    }

    #[test]
    fn test_reset() {
        let mut strategy = ReconnectionStrategy::default();

        strategy.next_delay();
        strategy.next_delay();
        assert_eq!(strategy.current_attempt(), 2);

        strategy.reset();
        assert_eq!(strategy.current_attempt(), 0);
        assert_eq!(strategy.elapsed(), Duration::ZERO);
        assert!(strategy.should_retry());
    }

    #[test]
    fn test_constant_delay_when_capped_at_base() {
        let mut strategy = ReconnectionStrategy::new(ReconnectConfig {
            base_delay_ms: 1000,
            max_delay_ms: 1000,
            max_elapsed_ms: 3000,
        });

        assert_eq!(strategy.next_delay(), Some(Duration::from_secs(1)));
        assert_eq!(strategy.next_delay(), Some(Duration::from_secs(1)));
        assert_eq!(strategy.next_delay(), Some(Duration::from_secs(1)));
        assert!(strategy.next_delay().is_none()); // Plus de tentatives
        assert!(!strategy.should_retry());
    }
}
