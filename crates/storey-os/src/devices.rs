use std::sync::Arc;
use std::time::Duration;

use storey::device::{ContainerKind, DeviceKind};
use storey::value::ResourceValue;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use tracing::debug;

use crate::error::Result;
use crate::raw::RawResource;
use crate::resource::{NodeContext, NodeKind, ResourceNode, leaf_attributes};
use crate::simulator::{
    PeriodicSimulator, RandomToggle, RandomWalk, Simulation, SimulatorConfig, WalkStep,
};

// People counted by a camera.
const CAMERA_RANGE: (f64, f64) = (0., 30.);
// Variation of the people count at each tick.
const CAMERA_VARIATION: (f64, f64) = (0., 5.);
// Delay before the first people count change.
const CAMERA_DELAY: Duration = Duration::from_secs(10);

// Probability of a presence change at each tick.
const PIR_TOGGLE_PROBABILITY: f64 = 0.5;

// Temperatures, in Celsius degrees.
const TEMPERATURE_RANGE: (f64, f64) = (15., 30.);
// Variation of the temperature at each tick.
const TEMPERATURE_VARIATION: (f64, f64) = (0., 0.5);

// Delay before the first change of the other simulated sensors.
const SENSOR_DELAY: Duration = Duration::from_secs(5);
// Time between two sensor changes.
const SENSOR_PERIOD: Duration = Duration::from_secs(5);

/// How the sensors of provisioned devices behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSettings {
    simulate: bool,
    seed: Option<u64>,
    period: Option<Duration>,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceSettings {
    /// Creates [`DeviceSettings`] simulating every sensor with its default
    /// timing.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            simulate: true,
            seed: None,
            period: None,
        }
    }

    /// Keeps sensors at their initial values.
    #[must_use]
    #[inline]
    pub const fn without_simulation(mut self) -> Self {
        self.simulate = false;
        self
    }

    /// Makes initial values and simulations reproducible.
    #[must_use]
    #[inline]
    pub const fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Replaces the default delays and periods of every simulation.
    #[must_use]
    #[inline]
    pub const fn period(mut self, period: Duration) -> Self {
        self.period = Some(period);
        self
    }

    /// Checks whether sensors are simulated.
    #[must_use]
    pub const fn is_simulated(&self) -> bool {
        self.simulate
    }

    fn config(&self, initial_delay: Duration) -> SimulatorConfig {
        let config = match self.period {
            Some(period) => SimulatorConfig::new().initial_delay(period).period(period),
            None => SimulatorConfig::new()
                .initial_delay(initial_delay)
                .period(SENSOR_PERIOD),
        };
        match self.seed {
            Some(seed) => config.seed(seed),
            None => config,
        }
    }

    fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}

// Builds a device and its leaf resource, without attaching it to the area.
pub(crate) fn build(
    context: &Arc<NodeContext>,
    area: &ResourceNode,
    device_id: &str,
    kind: DeviceKind,
) -> Result<ResourceNode> {
    let device = ResourceNode::composite(
        context,
        Some(area),
        ContainerKind::Device(kind),
        device_id,
        device_id.to_owned(),
    );

    let settings = context.devices;
    let mut rng = settings.rng();

    match kind {
        DeviceKind::Camera => {
            let (min, max) = CAMERA_RANGE;
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let raw = RawResource::new(kind.resource_type(), rng.gen_range(min..=max) as u32)
                .validator(move |count| f64::from(*count) <= max);
            let walk = RandomWalk::new(
                WalkStep::bounded(min, max),
                CAMERA_VARIATION.0,
                CAMERA_VARIATION.1,
            );
            leaf(context, &device, kind, raw, Some((walk, CAMERA_DELAY)))?;
        }
        DeviceKind::Pir => {
            let raw = RawResource::new(kind.resource_type(), false);
            let toggle = RandomToggle::new(PIR_TOGGLE_PROBABILITY);
            leaf(context, &device, kind, raw, Some((toggle, SENSOR_DELAY)))?;
        }
        DeviceKind::Temperature => {
            let (min, max) = TEMPERATURE_RANGE;
            let initial = (rng.gen_range(min..=max) * 10.).round() / 10.;
            let raw = RawResource::new(kind.resource_type(), initial)
                .validator(|temperature: &f64| temperature.is_finite());
            let walk = RandomWalk::new(
                WalkStep::bounded(min, max),
                TEMPERATURE_VARIATION.0,
                TEMPERATURE_VARIATION.1,
            );
            leaf(context, &device, kind, raw, Some((walk, SENSOR_DELAY)))?;
        }
        DeviceKind::Light | DeviceKind::Alarm => {
            let raw = RawResource::new(kind.resource_type(), false);
            leaf::<bool, RandomToggle>(context, &device, kind, raw, None)?;
        }
    }

    debug!("Built {kind} device `/{}`", device.path());
    Ok(device)
}

fn leaf<T, S>(
    context: &Arc<NodeContext>,
    device: &ResourceNode,
    kind: DeviceKind,
    raw: RawResource<T>,
    simulation: Option<(S, Duration)>,
) -> Result<()>
where
    T: ResourceValue,
    S: Simulation<T>,
{
    let name = kind.resource_name();
    let base_name = format!("{}:{name}", device.id());
    let raw = Arc::new(raw.id(base_name.as_str()));

    let node = ResourceNode::leaf(
        context,
        Some(device),
        name,
        base_name,
        kind.unit(),
        leaf_attributes(kind),
        Arc::clone(&raw),
        if kind.is_actuator() {
            NodeKind::Actuator
        } else {
            NodeKind::Sensor
        },
    );

    if let Some((simulation, initial_delay)) = simulation
        && context.devices.is_simulated()
    {
        let simulator =
            PeriodicSimulator::start(raw, simulation, context.devices.config(initial_delay))?;
        node.attach_simulator(simulator);
    }

    device.insert_child(node);
    Ok(())
}
