use serde::Serialize;

/// Bicycle subtype the engine uses to pick base speeds and penalties.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BicycleType {
    /// Narrow-tired and fast on pavement; the default for dedicated bikes.
    Road,
    /// City riding on roads and paths with good surfaces; the default for
    /// scooters and e-bikes.
    #[default]
    Hybrid,
    /// Cyclo-cross: road-like but tolerant of rougher surfaces.
    Cross,
    Mountain,
}

/// The engine-bias knobs the gateway drives, all in `[0, 1]`.
#[serde_with::skip_serializing_none]
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct BicycleCostingOptions {
    bicycle_type: Option<BicycleType>,
    cycling_speed: Option<f32>,
    use_roads: Option<f32>,
    use_hills: Option<f32>,
    avoid_bad_surfaces: Option<f32>,
    shortest: Option<bool>,
}

impl BicycleCostingOptions {
    #[must_use]
    pub fn builder() -> Self {
        Self::default()
    }

    pub fn bicycle_type(mut self, bicycle_type: BicycleType) -> Self {
        self.bicycle_type = Some(bicycle_type);
        self
    }

    /// Average travel speed along smooth, flat roads, in km/h.
    pub fn cycling_speed(mut self, speed: f32) -> Self {
        self.cycling_speed = Some(speed);
        self
    }

    /// Propensity to ride alongside traffic: `0` keeps to cycleways and
    /// paths, `1` takes roads freely.
    ///
    /// Engine default: `0.5`
    pub fn use_roads(mut self, willingness: f32) -> Self {
        self.use_roads = Some(willingness);
        self
    }

    /// Desire to tackle hills: `0` detours around steep grades, `1` takes
    /// them head-on.
    ///
    /// Engine default: `0.5`
    pub fn use_hills(mut self, willingness: f32) -> Self {
        self.use_hills = Some(willingness);
        self
    }

    /// Penalty weight for poor surfaces relative to the bicycle type; at `1`
    /// bad surfaces are disallowed outright.
    ///
    /// Engine default: `0.25`
    pub fn avoid_bad_surfaces(mut self, willingness: f32) -> Self {
        self.avoid_bad_surfaces = Some(willingness);
        self
    }

    /// Switch the metric to quasi-shortest, i.e. purely distance-based
    /// costing. Note this minimizes distance, never time.
    pub fn only_consider_quasi_shortest(mut self) -> Self {
        self.shortest = Some(true);
        self
    }
}

/// Costing model plus its options, flattened into the request as
/// `{"costing": "bicycle", "costing_options": {"bicycle": {..}}}`.
///
/// All micromobility vehicle types map to bicycle costing.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "costing", content = "costing_options", rename_all = "lowercase")]
pub enum Costing {
    Bicycle(BicycleCosting),
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct BicycleCosting {
    bicycle: BicycleCostingOptions,
}

impl Default for Costing {
    fn default() -> Self {
        Self::Bicycle(BicycleCosting::default())
    }
}

impl From<BicycleCostingOptions> for Costing {
    fn from(options: BicycleCostingOptions) -> Self {
        Self::Bicycle(BicycleCosting { bicycle: options })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_options_serialize_to_empty_object() {
        assert_eq!(
            serde_json::to_value(BicycleCostingOptions::default()).unwrap(),
            serde_json::json!({})
        );
    }

    #[test]
    fn costing_envelope_shape() {
        assert_eq!(
            serde_json::to_value(Costing::default()).unwrap(),
            serde_json::json!({"costing": "bicycle", "costing_options": {"bicycle": {}}})
        );
    }

    #[test]
    fn knobs_serialize_with_wire_names() {
        // Dyadic values survive the f32 -> JSON number conversion exactly.
        let options = BicycleCostingOptions::builder()
            .bicycle_type(BicycleType::Cross)
            .use_roads(0.5)
            .use_hills(0.25)
            .avoid_bad_surfaces(0.75)
            .only_consider_quasi_shortest();
        assert_eq!(
            serde_json::to_value(Costing::from(options)).unwrap(),
            serde_json::json!({
                "costing": "bicycle",
                "costing_options": {"bicycle": {
                    "bicycle_type": "cross",
                    "use_roads": 0.5,
                    "use_hills": 0.25,
                    "avoid_bad_surfaces": 0.75,
                    "shortest": true
                }}
            })
        );
    }
}
