//! Domain events emitted by the dispatch core, drained once per tick.

use bevy_ecs::prelude::Resource;
use serde::{Deserialize, Serialize};

use crate::request::RequestId;
use crate::spatial::Location;
use crate::vehicle::VehicleId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DomainEvent {
    VehicleSignedOn {
        time: u64,
        vehicle: VehicleId,
    },
    VehicleSignedOff {
        time: u64,
        vehicle: VehicleId,
    },
    RebalanceIssued {
        time: u64,
        vehicle: VehicleId,
        from: Location,
        to: Location,
    },
    RequestSubmitted {
        time: u64,
        request: RequestId,
    },
    RequestAssigned {
        time: u64,
        request: RequestId,
        vehicle: VehicleId,
    },
    RequestPickedUp {
        time: u64,
        request: RequestId,
        vehicle: VehicleId,
    },
    RequestDroppedOff {
        time: u64,
        request: RequestId,
        vehicle: VehicleId,
    },
    RequestCancelled {
        time: u64,
        request: RequestId,
        vehicle: Option<VehicleId>,
    },
}

impl DomainEvent {
    pub fn time(&self) -> u64 {
        match self {
            DomainEvent::VehicleSignedOn { time, .. }
            | DomainEvent::VehicleSignedOff { time, .. }
            | DomainEvent::RebalanceIssued { time, .. }
            | DomainEvent::RequestSubmitted { time, .. }
            | DomainEvent::RequestAssigned { time, .. }
            | DomainEvent::RequestPickedUp { time, .. }
            | DomainEvent::RequestDroppedOff { time, .. }
            | DomainEvent::RequestCancelled { time, .. } => *time,
        }
    }

    pub fn request(&self) -> Option<RequestId> {
        match self {
            DomainEvent::RequestSubmitted { request, .. }
            | DomainEvent::RequestAssigned { request, .. }
            | DomainEvent::RequestPickedUp { request, .. }
            | DomainEvent::RequestDroppedOff { request, .. }
            | DomainEvent::RequestCancelled { request, .. } => Some(*request),
            _ => None,
        }
    }
}

/// Ordered event buffer for the current tick.
#[derive(Debug, Default, Resource)]
pub struct DomainEvents {
    events: Vec<DomainEvent>,
}

impl DomainEvents {
    pub fn push(&mut self, event: DomainEvent) {
        self.events.push(event);
    }

    pub fn iter(&self) -> impl Iterator<Item = &DomainEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn drain(&mut self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.events)
    }
}
