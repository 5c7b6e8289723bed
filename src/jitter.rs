//! Randomization of backoff delays.
//!
//! Jitter spreads retries from many callers over time so they do not hit a
//! recovering dependency in lockstep.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Strategy for adding randomness to delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum JitterStrategy {
    /// No jitter applied.
    #[default]
    None,
    /// Random delay between 0 and the calculated delay (AWS recommended).
    Full,
    /// Half the delay fixed, the other half random.
    Equal,
    /// Each delay grows from the previous one (AWS style).
    Decorrelated,
}

impl JitterStrategy {
    /// Parse a strategy name, falling back to [`JitterStrategy::None`] for
    /// anything unrecognized.
    ///
    /// ```rust
    /// use breakwater::JitterStrategy;
    ///
    /// assert_eq!(JitterStrategy::from_name("full"), JitterStrategy::Full);
    /// assert_eq!(JitterStrategy::from_name("Equal"), JitterStrategy::Equal);
    /// assert_eq!(JitterStrategy::from_name("sideways"), JitterStrategy::None);
    /// ```
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "full" => Self::Full,
            "equal" => Self::Equal,
            "decorrelated" => Self::Decorrelated,
            _ => Self::None,
        }
    }
}

impl FromStr for JitterStrategy {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_name(s))
    }
}

impl fmt::Display for JitterStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Full => "full",
            Self::Equal => "equal",
            Self::Decorrelated => "decorrelated",
        };
        f.write_str(name)
    }
}

/// Source of uniform random numbers in `[0, 1)`.
pub type RandomSource = Arc<dyn Fn() -> f64 + Send + Sync>;

fn thread_random() -> f64 {
    rand::random::<f64>()
}

/// Turns a base delay into a randomized delay.
///
/// The calculator is pure apart from the decorrelated strategy, which feeds
/// each result into the ceiling of the next call. That state lives in the
/// calculator itself and is cleared with [`JitterCalculator::reset`].
///
/// # Examples
///
/// ```rust
/// use breakwater::{JitterCalculator, JitterStrategy};
/// use std::time::Duration;
///
/// let mut jitter = JitterCalculator::new(JitterStrategy::Equal).with_random(|| 0.5);
/// let delay = jitter.calculate(Duration::from_millis(100), Duration::from_secs(1));
/// assert_eq!(delay, Duration::from_millis(75));
/// ```
#[derive(Clone)]
pub struct JitterCalculator {
    strategy: JitterStrategy,
    random: RandomSource,
    previous: Duration,
}

impl JitterCalculator {
    /// Create a calculator backed by the thread-local RNG.
    pub fn new(strategy: JitterStrategy) -> Self {
        Self {
            strategy,
            random: Arc::new(thread_random),
            previous: Duration::ZERO,
        }
    }

    /// Replace the random source, typically with a fixed value in tests.
    ///
    /// Values outside `[0, 1]` are clamped.
    pub fn with_random<F>(mut self, random: F) -> Self
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        self.random = Arc::new(random);
        self
    }

    /// The configured strategy.
    pub fn strategy(&self) -> JitterStrategy {
        self.strategy
    }

    /// Compute the jittered delay for `base`, never exceeding `max` for the
    /// decorrelated strategy.
    pub fn calculate(&mut self, base: Duration, max: Duration) -> Duration {
        match self.strategy {
            JitterStrategy::None => base,
            JitterStrategy::Full => scale(base, self.sample()),
            JitterStrategy::Equal => {
                let half = base / 2;
                half + scale(half, self.sample())
            }
            JitterStrategy::Decorrelated => {
                let ceiling = self.previous.saturating_mul(3).min(max).max(base);
                let spread = ceiling.saturating_sub(base);
                let delay = (base + scale(spread, self.sample())).min(max);
                self.previous = delay;
                delay
            }
        }
    }

    /// Forget the previous decorrelated delay.
    pub fn reset(&mut self) {
        self.previous = Duration::ZERO;
    }

    fn sample(&self) -> f64 {
        let value = (self.random)();
        if value.is_finite() {
            value.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

/// `duration * factor` for `factor` in `[0, 1]`, never above `duration`.
fn scale(duration: Duration, factor: f64) -> Duration {
    Duration::try_from_secs_f64(duration.as_secs_f64() * factor)
        .unwrap_or(duration)
        .min(duration)
}

impl fmt::Debug for JitterCalculator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JitterCalculator")
            .field("strategy", &self.strategy)
            .field("previous", &self.previous)
            .finish_non_exhaustive()
    }
}
