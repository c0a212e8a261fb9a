use std::collections::BTreeMap;

use tracing::info;

use super::{
    BipartitePolicy, DispatchPolicy, LpRebalancingPolicy, NearestTaxiPolicy, PolicyInputs,
    ReferencePolicy,
};
use crate::error::{DispatchError, DispatchResult};
use crate::scenario::DispatchConfig;
use crate::zones::DispatchingZones;

pub type PolicyConstructor = Box<
    dyn Fn(&PolicyInputs, &DispatchConfig) -> DispatchResult<Box<dyn DispatchPolicy>> + Send + Sync,
>;

/// Policies by configuration name.
pub struct PolicyRegistry {
    constructors: BTreeMap<String, PolicyConstructor>,
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("bipartite", |_, config| Ok(Box::new(BipartitePolicy::new(config))));
        registry.register("ntnr", |inputs, _| {
            Ok(Box::new(NearestTaxiPolicy::new(
                inputs.grid.clone(),
                inputs.forecast.clone(),
            )))
        });
        registry.register("reference", |inputs, config| {
            let ranks = inputs
                .ranks
                .clone()
                .ok_or_else(|| DispatchError::Config("reference policy needs taxi ranks".into()))?;
            let zones = match (&inputs.zones, &inputs.grid) {
                (Some(zones), _) => zones.clone(),
                (None, Some(grid)) => DispatchingZones::from_grid(grid),
                (None, None) => {
                    return Err(DispatchError::Config(
                        "reference policy needs dispatching zones or a grid".into(),
                    ))
                }
            };
            let fallback_centre = inputs.grid.as_ref().map(|grid| grid.bounds().center());
            Ok(Box::new(ReferencePolicy::new(
                ranks,
                zones,
                &config.reference,
                fallback_centre,
            )?))
        });
        registry.register("lp_rebalancing", |inputs, config| {
            Ok(Box::new(LpRebalancingPolicy::new(inputs, config)?))
        });
        registry
    }
}

impl PolicyRegistry {
    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// Add or replace a policy under `name`.
    pub fn register<F>(&mut self, name: &str, constructor: F)
    where
        F: Fn(&PolicyInputs, &DispatchConfig) -> DispatchResult<Box<dyn DispatchPolicy>>
            + Send
            + Sync
            + 'static,
    {
        self.constructors.insert(name.to_string(), Box::new(constructor));
    }

    pub fn build(
        &self,
        name: &str,
        inputs: &PolicyInputs,
        config: &DispatchConfig,
    ) -> DispatchResult<Box<dyn DispatchPolicy>> {
        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| DispatchError::UnknownPolicy(name.to_string()))?;
        let policy = constructor(inputs, config)?;
        info!(policy = name, "dispatch policy built");
        Ok(policy)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }
}
