use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use storey::value::ResourceValue;

use parking_lot::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use tokio::task::JoinHandle;

use tokio_util::sync::CancellationToken;

use tracing::{debug, error, warn};

use crate::error::{Error, ErrorKind, Result};
use crate::raw::RawResource;

// Default time between two ticks.
const DEFAULT_PERIOD: Duration = Duration::from_secs(5);

/// Direction of a random walk step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    /// Increase the value.
    Positive,
    /// Decrease the value.
    Negative,
}

/// A deterministic random walk step, clamped at optional bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WalkStep {
    lower: Option<f64>,
    upper: Option<f64>,
}

impl WalkStep {
    /// Creates a [`WalkStep`] bounded on both sides.
    #[must_use]
    pub const fn bounded(lower: f64, upper: f64) -> Self {
        Self {
            lower: Some(lower),
            upper: Some(upper),
        }
    }

    /// Creates a [`WalkStep`] without bounds.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self {
            lower: None,
            upper: None,
        }
    }

    /// Applies a variation of the given magnitude to the current value.
    #[must_use]
    pub fn apply(&self, current: f64, magnitude: f64, sign: Sign) -> f64 {
        let next = match sign {
            Sign::Positive => current + magnitude,
            Sign::Negative => current - magnitude,
        };
        let next = self.lower.map_or(next, |lower| next.max(lower));
        self.upper.map_or(next, |upper| next.min(upper))
    }
}

/// A numeric value moved by a [`RandomWalk`].
pub trait WalkValue: ResourceValue + Copy {
    /// Converts the value into a float.
    fn to_f64(self) -> f64;

    /// Converts a float back into a value.
    fn from_f64(value: f64) -> Self;
}

impl WalkValue for u32 {
    fn to_f64(self) -> f64 {
        f64::from(self)
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn from_f64(value: f64) -> Self {
        value.round().clamp(0., f64::from(u32::MAX)) as u32
    }
}

impl WalkValue for f64 {
    fn to_f64(self) -> f64 {
        self
    }

    fn from_f64(value: f64) -> Self {
        value
    }
}

/// The next-value rule of a simulated resource.
pub trait Simulation<T>: Send + 'static {
    /// Computes the next value.
    ///
    /// Returning [`None`] leaves the resource untouched for this tick.
    ///
    /// # Errors
    ///
    /// A failing draw is logged and does not stop the simulation.
    fn next(&mut self, current: &T, rng: &mut StdRng) -> Result<Option<T>>;
}

/// A bounded random walk: each tick moves the value by a magnitude drawn
/// uniformly in `[min_variation, max_variation]`, with a random sign.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RandomWalk {
    step: WalkStep,
    min_variation: f64,
    max_variation: f64,
}

impl RandomWalk {
    /// Creates a [`RandomWalk`].
    #[must_use]
    pub const fn new(step: WalkStep, min_variation: f64, max_variation: f64) -> Self {
        Self {
            step,
            min_variation,
            max_variation,
        }
    }
}

impl<T: WalkValue> Simulation<T> for RandomWalk {
    fn next(&mut self, current: &T, rng: &mut StdRng) -> Result<Option<T>> {
        if !(self.min_variation <= self.max_variation) {
            return Err(Error::new(
                ErrorKind::Internal,
                format!(
                    "Invalid variation range [{}, {}]",
                    self.min_variation, self.max_variation
                ),
            ));
        }

        let magnitude = rng.gen_range(self.min_variation..=self.max_variation);
        let sign = if rng.gen_bool(0.5) {
            Sign::Positive
        } else {
            Sign::Negative
        };

        Ok(Some(T::from_f64(self.step.apply(
            current.to_f64(),
            magnitude,
            sign,
        ))))
    }
}

/// A boolean value flipping with a fixed probability at every tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RandomToggle {
    probability: f64,
}

impl RandomToggle {
    /// Creates a [`RandomToggle`].
    ///
    /// The probability is clamped into `[0, 1]`.
    #[must_use]
    pub fn new(probability: f64) -> Self {
        Self {
            probability: if probability.is_nan() {
                0.
            } else {
                probability.clamp(0., 1.)
            },
        }
    }
}

impl Simulation<bool> for RandomToggle {
    fn next(&mut self, current: &bool, rng: &mut StdRng) -> Result<Option<bool>> {
        Ok(rng.gen_bool(self.probability).then_some(!*current))
    }
}

/// Timing of a [`PeriodicSimulator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulatorConfig {
    initial_delay: Duration,
    period: Duration,
    seed: Option<u64>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatorConfig {
    /// Creates a [`SimulatorConfig`] ticking every 5 seconds, starting
    /// immediately.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            period: DEFAULT_PERIOD,
            seed: None,
        }
    }

    /// Sets the delay before the first tick.
    #[must_use]
    #[inline]
    pub const fn initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    /// Sets the time between two ticks.
    #[must_use]
    #[inline]
    pub const fn period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Makes the random draws reproducible.
    #[must_use]
    #[inline]
    pub const fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// A task periodically moving the value of a [`RawResource`].
#[derive(Debug)]
pub struct PeriodicSimulator {
    token: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicSimulator {
    /// Starts a simulation task on the current `tokio` runtime.
    ///
    /// # Errors
    ///
    /// An error is returned when called outside a `tokio` runtime.
    pub fn start<T, S>(
        resource: Arc<RawResource<T>>,
        simulation: S,
        config: SimulatorConfig,
    ) -> Result<Self>
    where
        T: ResourceValue,
        S: Simulation<T>,
    {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            Error::new(
                ErrorKind::Internal,
                format!("Simulator started outside a runtime: {e}"),
            )
        })?;

        let token = CancellationToken::new();
        let handle = runtime.spawn(run(resource, simulation, config, token.clone()));

        Ok(Self {
            token,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Checks whether the simulation task is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stops the simulation and waits for the in-flight tick to complete.
    ///
    /// Stopping an already stopped simulator does nothing.
    pub async fn stop(&self) {
        self.token.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            error!("Failed to await the simulation task: {e}");
        }
    }
}

impl Drop for PeriodicSimulator {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn run<T, S>(
    resource: Arc<RawResource<T>>,
    mut simulation: S,
    config: SimulatorConfig,
    token: CancellationToken,
) where
    T: ResourceValue,
    S: Simulation<T>,
{
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    tokio::select! {
        () = token.cancelled() => return,
        () = tokio::time::sleep(config.initial_delay) => {}
    }

    let mut interval = tokio::time::interval(config.period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = interval.tick() => tick(&resource, &mut simulation, &mut rng),
        }
    }

    debug!("Simulation of resource `{}` stopped", resource.resource_id());
}

fn tick<T, S>(resource: &RawResource<T>, simulation: &mut S, rng: &mut StdRng)
where
    T: ResourceValue,
    S: Simulation<T>,
{
    let mut failure = None;
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        resource.update(|current| match simulation.next(current, rng) {
            Ok(next) => next,
            Err(e) => {
                failure = Some(e);
                None
            }
        })
    }));

    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Tick of resource `{}` refused: {e}", resource.resource_id()),
        Err(_) => error!("Tick of resource `{}` panicked", resource.resource_id()),
    }

    if let Some(e) = failure {
        warn!("Tick of resource `{}` failed: {e}", resource.resource_id());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use crate::error::Result;
    use crate::raw::RawResource;

    use super::{
        PeriodicSimulator, RandomToggle, RandomWalk, Sign, Simulation, SimulatorConfig, WalkStep,
    };

    #[test]
    fn test_walk_step() {
        let camera = WalkStep::bounded(0., 30.);

        assert_eq!(camera.apply(12., 7., Sign::Negative), 5.);
        assert_eq!(camera.apply(3., 5., Sign::Negative), 0.);
        assert_eq!(camera.apply(28., 5., Sign::Positive), 30.);
        assert_eq!(WalkStep::unbounded().apply(-3., 5., Sign::Negative), -8.);
    }

    #[test]
    fn test_random_walk_stays_in_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut walk = RandomWalk::new(WalkStep::bounded(0., 30.), 0., 5.);

        let mut value = 12u32;
        for _ in 0..1000 {
            let next: u32 = walk.next(&value, &mut rng).unwrap().unwrap();
            assert!(next <= 30);
            assert!(next.abs_diff(value) <= 5);
            value = next;
        }
    }

    #[test]
    fn test_invalid_variation_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut walk = RandomWalk::new(WalkStep::unbounded(), 1., 0.);

        assert!(Simulation::<f64>::next(&mut walk, &20., &mut rng).is_err());
    }

    #[test]
    fn test_random_toggle() {
        let mut rng = StdRng::seed_from_u64(7);

        assert_eq!(
            RandomToggle::new(1.).next(&false, &mut rng).unwrap(),
            Some(true)
        );
        assert_eq!(RandomToggle::new(0.).next(&true, &mut rng).unwrap(), None);
        assert_eq!(
            RandomToggle::new(f64::NAN).next(&true, &mut rng).unwrap(),
            None
        );
    }

    struct Failing(Arc<AtomicUsize>);

    impl Simulation<u32> for Failing {
        fn next(&mut self, current: &u32, _: &mut StdRng) -> Result<Option<u32>> {
            let tick = self.0.fetch_add(1, Ordering::SeqCst);
            assert!(tick != 1, "second tick panics");
            Ok(Some(current + 10))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_ticks_do_not_stop_simulation() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let resource = Arc::new(RawResource::new("iot.sensor.camera", 0u32).validator(|v| *v <= 30));

        let simulator = PeriodicSimulator::start(
            Arc::clone(&resource),
            Failing(Arc::clone(&ticks)),
            SimulatorConfig::new()
                .initial_delay(Duration::from_secs(10))
                .period(Duration::from_secs(5)),
        )
        .unwrap();

        // Nothing happens before the initial delay.
        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);

        // Ticks at 10s, 15s (panic), 20s, 25s, 30s (rejected: 40 > 30).
        tokio::time::sleep(Duration::from_secs(22)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 5);
        assert_eq!(resource.value(), 30);
        assert!(simulator.is_running());

        simulator.stop().await;
        assert!(!simulator.is_running());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 5);

        // Stopping twice is harmless.
        simulator.stop().await;
    }
}
