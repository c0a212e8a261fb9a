use std::fmt;

use serde::{Deserialize, Serialize};

use crate::menu::SharedMenu;
use crate::spatial::Location;
use crate::task::{Task, TaskKind, TaskQueue};

/// Dense vehicle index, stable for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VehicleId(pub usize);

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VehicleStatus {
    Stay,
    DriveToCustomer,
    DriveWithCustomer,
    Rebalance,
    OffService,
}

impl VehicleStatus {
    pub const ALL: [VehicleStatus; 5] = [
        VehicleStatus::Stay,
        VehicleStatus::DriveToCustomer,
        VehicleStatus::DriveWithCustomer,
        VehicleStatus::Rebalance,
        VehicleStatus::OffService,
    ];

    pub fn is_in_service(self) -> bool {
        self != VehicleStatus::OffService
    }

    /// Empty and not committed to a customer.
    pub fn is_unassigned(self) -> bool {
        matches!(self, VehicleStatus::Stay | VehicleStatus::Rebalance)
    }
}

/// Distance and trip counters accumulated as tasks complete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TripLedger {
    pub distance_empty_m: f64,
    pub distance_with_customer_m: f64,
    pub trips_served: u32,
}

/// A fleet vehicle. All mutation goes through the directive executor.
#[derive(Debug, Clone)]
pub struct RoboTaxi {
    pub(crate) id: VehicleId,
    pub(crate) capacity: u32,
    pub(crate) status: VehicleStatus,
    pub(crate) tasks: TaskQueue,
    pub(crate) menu: SharedMenu,
    pub(crate) onboard: u32,
    pub(crate) drive_destination: Location,
    pub(crate) version: u64,
    /// End of the vehicle's service day; open stays run until then.
    pub(crate) service_end: f64,
    pub(crate) ledger: TripLedger,
}

impl RoboTaxi {
    pub fn new(id: VehicleId, location: Location, capacity: u32, start: f64) -> Self {
        Self {
            id,
            capacity,
            status: VehicleStatus::Stay,
            tasks: TaskQueue::new(Task::stay(location, start, f64::INFINITY)),
            menu: SharedMenu::default(),
            onboard: 0,
            drive_destination: location,
            version: 0,
            service_end: f64::INFINITY,
            ledger: TripLedger::default(),
        }
    }

    /// A vehicle that starts the run signed off.
    pub fn new_off_service(id: VehicleId, location: Location, capacity: u32, start: f64) -> Self {
        let mut taxi = Self::new(id, location, capacity, start);
        taxi.status = VehicleStatus::OffService;
        taxi.tasks = TaskQueue::new(Task::off_service(location, start, f64::INFINITY));
        taxi
    }

    /// Limit the service day. Open stays created afterwards end at `end`.
    pub fn with_service_end(mut self, end: f64) -> Self {
        self.service_end = end;
        self
    }

    pub fn id(&self) -> VehicleId {
        self.id
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn status(&self) -> VehicleStatus {
        self.status
    }

    pub fn tasks(&self) -> &TaskQueue {
        &self.tasks
    }

    pub fn menu(&self) -> &SharedMenu {
        &self.menu
    }

    pub fn onboard(&self) -> u32 {
        self.onboard
    }

    pub fn has_passenger(&self) -> bool {
        self.onboard > 0
    }

    pub fn drive_destination(&self) -> Location {
        self.drive_destination
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn ledger(&self) -> TripLedger {
        self.ledger
    }

    pub fn divertable_location(&self, now: f64) -> Location {
        self.tasks.divertable_point(now).0
    }

    pub fn divertable_time(&self, now: f64) -> f64 {
        self.tasks.divertable_point(now).1
    }

    pub fn location_at(&self, now: f64) -> Location {
        self.tasks.current().position_at(now)
    }

    /// Whether the vehicle is standing in an open stay (not driving, not loading).
    pub fn is_standing(&self) -> bool {
        matches!(
            self.tasks.current().kind,
            TaskKind::Stay { .. } | TaskKind::OffServiceStay { .. }
        )
    }
}
