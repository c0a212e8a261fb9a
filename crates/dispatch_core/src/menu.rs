//! Shared (pooled) menu: the ordered stops a vehicle still has to make.
//!
//! Invariants, checked after every mutation:
//! - each request has at most one pickup and one dropoff, pickup first;
//! - a redirect appears at most once and only as the last course;
//! - a redirect only exists while no passenger course is left.

use serde::{Deserialize, Serialize};

use crate::request::RequestId;
use crate::spatial::Location;
use crate::vehicle::VehicleStatus;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Course {
    Pickup { request: RequestId, at: Location },
    Dropoff { request: RequestId, at: Location },
    Redirect { to: Location },
}

impl Course {
    pub fn location(&self) -> Location {
        match self {
            Course::Pickup { at, .. } | Course::Dropoff { at, .. } => *at,
            Course::Redirect { to } => *to,
        }
    }

    pub fn request(&self) -> Option<RequestId> {
        match self {
            Course::Pickup { request, .. } | Course::Dropoff { request, .. } => Some(*request),
            Course::Redirect { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SharedMenu {
    courses: Vec<Course>,
}

impl SharedMenu {
    pub fn courses(&self) -> &[Course] {
        &self.courses
    }

    pub fn head(&self) -> Option<&Course> {
        self.courses.first()
    }

    pub fn is_empty(&self) -> bool {
        self.courses.is_empty()
    }

    pub fn contains_request(&self, request: RequestId) -> bool {
        self.courses.iter().any(|c| c.request() == Some(request))
    }

    /// Status implied by the head course and the passengers on board.
    pub fn derived_status(&self, onboard: u32) -> VehicleStatus {
        match self.head() {
            None => VehicleStatus::Stay,
            Some(Course::Redirect { .. }) => VehicleStatus::Rebalance,
            Some(_) if onboard > 0 => VehicleStatus::DriveWithCustomer,
            Some(_) => VehicleStatus::DriveToCustomer,
        }
    }

    /// Append a pickup/dropoff pair. Any redirect is dropped first.
    pub fn add_request(&mut self, request: RequestId, origin: Location, destination: Location) {
        self.remove_redirect();
        self.courses.push(Course::Pickup { request, at: origin });
        self.courses.push(Course::Dropoff {
            request,
            at: destination,
        });
        self.assert_invariants();
    }

    /// Append a dropoff for a passenger who is already on board.
    pub fn add_onboard(&mut self, request: RequestId, destination: Location) {
        self.remove_redirect();
        self.courses.push(Course::Dropoff {
            request,
            at: destination,
        });
        self.assert_invariants();
    }

    /// Replace the redirect target. Panics while passenger courses are left.
    pub fn set_redirect(&mut self, to: Location) {
        self.remove_redirect();
        self.courses.push(Course::Redirect { to });
        self.assert_invariants();
    }

    pub fn remove_redirect(&mut self) -> Option<Location> {
        match self.courses.last() {
            Some(Course::Redirect { to }) => {
                let to = *to;
                self.courses.pop();
                Some(to)
            }
            _ => None,
        }
    }

    /// Remove every course of `request`, e.g. after a cancellation.
    pub fn remove_request(&mut self, request: RequestId) -> bool {
        let before = self.courses.len();
        self.courses.retain(|c| c.request() != Some(request));
        self.assert_invariants();
        self.courses.len() != before
    }

    /// Pop the head course once the vehicle has served it.
    pub fn complete_head(&mut self) -> Option<Course> {
        if self.courses.is_empty() {
            return None;
        }
        let course = self.courses.remove(0);
        self.assert_invariants();
        Some(course)
    }

    /// Reorder the courses. The new order must be a permutation satisfying the invariants.
    pub fn reorder(&mut self, courses: Vec<Course>) {
        assert_eq!(
            courses.len(),
            self.courses.len(),
            "menu reorder must keep every course"
        );
        for course in &courses {
            assert!(
                self.courses.contains(course),
                "menu reorder introduced a new course {course:?}"
            );
        }
        self.courses = courses;
        self.assert_invariants();
    }

    pub fn assert_invariants(&self) {
        let mut picked: Vec<RequestId> = Vec::new();
        let mut dropped: Vec<RequestId> = Vec::new();
        for (index, course) in self.courses.iter().enumerate() {
            match course {
                Course::Pickup { request, .. } => {
                    assert!(
                        !picked.contains(request) && !dropped.contains(request),
                        "menu has a second pickup for {request} or a pickup after its dropoff"
                    );
                    picked.push(*request);
                }
                Course::Dropoff { request, .. } => {
                    assert!(
                        !dropped.contains(request),
                        "menu has a second dropoff for {request}"
                    );
                    dropped.push(*request);
                }
                Course::Redirect { .. } => {
                    assert!(
                        index + 1 == self.courses.len(),
                        "menu redirect must be the last course"
                    );
                    assert!(
                        index == 0,
                        "menu redirect cannot follow unserved passenger courses"
                    );
                }
            }
        }
        for request in &picked {
            assert!(
                dropped.contains(request),
                "menu pickup for {request} has no matching dropoff"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(x: f64) -> Location {
        Location::new(x, 0.0)
    }

    #[test]
    fn status_follows_the_head_course() {
        let mut menu = SharedMenu::default();
        assert_eq!(menu.derived_status(0), VehicleStatus::Stay);
        menu.set_redirect(at(5.0));
        assert_eq!(menu.derived_status(0), VehicleStatus::Rebalance);
        menu.add_request(RequestId(1), at(1.0), at(2.0));
        assert_eq!(menu.courses().len(), 2, "redirect is dropped for passengers");
        assert_eq!(menu.derived_status(0), VehicleStatus::DriveToCustomer);
        menu.complete_head();
        assert_eq!(menu.derived_status(1), VehicleStatus::DriveWithCustomer);
    }

    #[test]
    fn removing_a_request_removes_both_courses() {
        let mut menu = SharedMenu::default();
        menu.add_request(RequestId(1), at(1.0), at(2.0));
        menu.add_request(RequestId(2), at(3.0), at(4.0));
        assert!(menu.remove_request(RequestId(1)));
        assert!(!menu.contains_request(RequestId(1)));
        assert_eq!(menu.courses().len(), 2);
        assert!(menu.remove_redirect().is_none());
    }

    #[test]
    #[should_panic(expected = "cannot follow unserved passenger courses")]
    fn redirect_behind_passenger_courses_panics() {
        let mut menu = SharedMenu::default();
        menu.add_request(RequestId(1), at(1.0), at(2.0));
        menu.set_redirect(at(9.0));
    }

    #[test]
    #[should_panic(expected = "pickup after its dropoff")]
    fn reorder_cannot_put_dropoff_first() {
        let mut menu = SharedMenu::default();
        menu.add_request(RequestId(1), at(1.0), at(2.0));
        let reversed: Vec<Course> = menu.courses().iter().rev().copied().collect();
        menu.reorder(reversed);
    }
}
