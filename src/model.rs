//! Trip data model: ordered waypoints, per-leg transport modes and derived leg requests.

use std::{fmt, str::FromStr};

use crate::foundation::{
    core::Coordinate,
    error::{TripError, TripResult},
};

/// Stable identifier of a point in the trip.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LocationId {
    Start,
    End,
    Waypoint(u64),
}

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => f.write_str("start"),
            Self::End => f.write_str("end"),
            Self::Waypoint(n) => write!(f, "waypoint-{n}"),
        }
    }
}

impl FromStr for LocationId {
    type Err = TripError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Self::Start),
            "end" => Ok(Self::End),
            other => other
                .strip_prefix("waypoint-")
                .and_then(|n| n.parse().ok())
                .map(Self::Waypoint)
                .ok_or_else(|| TripError::input(format!("unknown location id '{other}'"))),
        }
    }
}

impl TryFrom<String> for LocationId {
    type Error = TripError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<LocationId> for String {
    fn from(id: LocationId) -> Self {
        id.to_string()
    }
}

/// How a leg is travelled. `Plane` legs are drawn as great-circle segments and never routed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String")]
pub enum TransportMode {
    #[default]
    Car,
    Bike,
    Walk,
    Plane,
}

impl TransportMode {
    pub const ALL: [TransportMode; 4] = [Self::Car, Self::Bike, Self::Walk, Self::Plane];

    /// Whether legs in this mode skip the road router.
    pub fn is_flight(self) -> bool {
        matches!(self, Self::Plane)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Car => "Car",
            Self::Bike => "Bike",
            Self::Walk => "Walk",
            Self::Plane => "Plane",
        }
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportMode {
    type Err = TripError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "car" | "drive" | "driving" => Ok(Self::Car),
            "bike" | "bicycle" | "cycling" => Ok(Self::Bike),
            "walk" | "foot" | "walking" => Ok(Self::Walk),
            "plane" | "fly" | "flight" => Ok(Self::Plane),
            other => Err(TripError::input(format!("unknown transport mode '{other}'"))),
        }
    }
}

impl TryFrom<String> for TransportMode {
    type Error = TripError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// A waypoint in the trip.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LocationPoint {
    pub id: LocationId,
    /// Free text as typed, or the geocoder's display name once resolved.
    #[serde(default)]
    pub name: String,
    /// Mode of the outgoing leg; ignored on the last point.
    #[serde(default)]
    pub transport: TransportMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LocationPoint {
    pub fn new(id: LocationId) -> Self {
        Self {
            id,
            name: String::new(),
            transport: TransportMode::default(),
            lat: None,
            lng: None,
            error: None,
        }
    }

    /// Resolved position, if both halves are present.
    pub fn coordinate(&self) -> Option<Coordinate> {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Some(Coordinate::new(lat, lng)),
            _ => None,
        }
    }

    /// A point is valid (routable) once geocoding succeeded.
    pub fn is_valid(&self) -> bool {
        self.coordinate().is_some()
    }
}

/// One leg to resolve: consecutive valid points `from -> to`.
#[derive(Clone, Debug, PartialEq)]
pub struct LegRequest {
    /// 0-based leg index in trip order.
    pub index: usize,
    pub from_id: LocationId,
    pub to_id: LocationId,
    pub from: Coordinate,
    pub to: Coordinate,
    /// The origin point's transport mode.
    pub mode: TransportMode,
}

/// Everything the routes depend on: valid coordinates in order plus outgoing modes.
///
/// Two trips with equal keys produce the same leg requests, so a key change is the
/// recomputation trigger.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RouteKey(Vec<(Coordinate, Option<TransportMode>)>);

impl RouteKey {
    pub fn leg_count(&self) -> usize {
        self.0.len().saturating_sub(1)
    }
}

/// Ordered trip: `start`, zero or more waypoints, `end`.
#[derive(Clone, Debug, PartialEq)]
pub struct Trip {
    points: Vec<LocationPoint>,
    next_waypoint: u64,
}

impl Default for Trip {
    fn default() -> Self {
        Self::new()
    }
}

impl Trip {
    /// `[start, end]`, both unresolved.
    pub fn new() -> Self {
        Self {
            points: vec![
                LocationPoint::new(LocationId::Start),
                LocationPoint::new(LocationId::End),
            ],
            next_waypoint: 1,
        }
    }

    /// Build a trip from an ordered point list, enforcing the start/waypoints/end shape.
    pub fn from_points(points: Vec<LocationPoint>) -> TripResult<Self> {
        if points.len() < 2 {
            return Err(TripError::input("a trip needs a start and an end point"));
        }
        if points[0].id != LocationId::Start {
            return Err(TripError::input("the first point must be 'start'"));
        }
        if points[points.len() - 1].id != LocationId::End {
            return Err(TripError::input("the last point must be 'end'"));
        }

        let mut seen = std::collections::HashSet::new();
        let mut max_waypoint = 0;
        for p in &points[1..points.len() - 1] {
            let LocationId::Waypoint(n) = p.id else {
                return Err(TripError::input(format!(
                    "'{}' may only appear once, at its fixed position",
                    p.id
                )));
            };
            if !seen.insert(n) {
                return Err(TripError::input(format!("duplicate point id '{}'", p.id)));
            }
            max_waypoint = max_waypoint.max(n);
        }

        for p in &points {
            if let Some(c) = p.coordinate() {
                c.validate()?;
            }
        }

        Ok(Self {
            points,
            next_waypoint: max_waypoint + 1,
        })
    }

    pub fn points(&self) -> &[LocationPoint] {
        &self.points
    }

    pub fn into_points(self) -> Vec<LocationPoint> {
        self.points
    }

    pub fn get(&self, id: LocationId) -> Option<&LocationPoint> {
        self.points.iter().find(|p| p.id == id)
    }

    fn get_mut(&mut self, id: LocationId) -> TripResult<&mut LocationPoint> {
        self.points
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| TripError::input(format!("no location with id '{id}'")))
    }

    /// Insert a new unresolved waypoint just before `end`.
    pub fn add_waypoint(&mut self) -> LocationId {
        let id = LocationId::Waypoint(self.next_waypoint);
        self.next_waypoint += 1;
        let at = self.points.len() - 1;
        self.points.insert(at, LocationPoint::new(id));
        id
    }

    pub fn remove_waypoint(&mut self, id: LocationId) -> TripResult<LocationPoint> {
        if !matches!(id, LocationId::Waypoint(_)) {
            return Err(TripError::input(format!("'{id}' cannot be removed")));
        }
        let idx = self
            .points
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| TripError::input(format!("no location with id '{id}'")))?;
        Ok(self.points.remove(idx))
    }

    /// Move a waypoint by `delta` positions, staying strictly between start and end.
    pub fn move_waypoint(&mut self, id: LocationId, delta: isize) -> TripResult<()> {
        if !matches!(id, LocationId::Waypoint(_)) {
            return Err(TripError::input(format!("'{id}' cannot be moved")));
        }
        let idx = self
            .points
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| TripError::input(format!("no location with id '{id}'")))?;
        let last_waypoint = self.points.len() - 2;
        let target = (idx as isize + delta).clamp(1, last_waypoint as isize) as usize;
        let p = self.points.remove(idx);
        self.points.insert(target, p);
        Ok(())
    }

    /// Rename a point; it becomes unresolved until geocoded again.
    pub fn set_name(&mut self, id: LocationId, name: impl Into<String>) -> TripResult<()> {
        let p = self.get_mut(id)?;
        p.name = name.into();
        p.lat = None;
        p.lng = None;
        p.error = None;
        Ok(())
    }

    pub fn set_transport(&mut self, id: LocationId, mode: TransportMode) -> TripResult<()> {
        self.get_mut(id)?.transport = mode;
        Ok(())
    }

    /// Store a successful geocode.
    pub fn apply_place(
        &mut self,
        id: LocationId,
        at: Coordinate,
        display_name: impl Into<String>,
    ) -> TripResult<()> {
        at.validate()?;
        let p = self.get_mut(id)?;
        p.lat = Some(at.lat);
        p.lng = Some(at.lng);
        p.name = display_name.into();
        p.error = None;
        Ok(())
    }

    /// Store a failed geocode; the point becomes invalid.
    pub fn set_error(&mut self, id: LocationId, message: impl Into<String>) -> TripResult<()> {
        let p = self.get_mut(id)?;
        p.lat = None;
        p.lng = None;
        p.error = Some(message.into());
        Ok(())
    }

    pub fn valid_points(&self) -> impl Iterator<Item = &LocationPoint> {
        self.points.iter().filter(|p| p.is_valid())
    }

    pub fn valid_count(&self) -> usize {
        self.valid_points().count()
    }

    /// One request per consecutive pair of valid points. Invalid points are skipped, so a
    /// leg may bridge over an unresolved waypoint using the earlier point's mode.
    pub fn leg_requests(&self) -> Vec<LegRequest> {
        let valid: Vec<(&LocationPoint, Coordinate)> = self
            .valid_points()
            .filter_map(|p| p.coordinate().map(|c| (p, c)))
            .collect();

        valid
            .windows(2)
            .enumerate()
            .map(|(index, w)| LegRequest {
                index,
                from_id: w[0].0.id,
                to_id: w[1].0.id,
                from: w[0].1,
                to: w[1].1,
                mode: w[0].0.transport,
            })
            .collect()
    }

    pub fn route_key(&self) -> RouteKey {
        let valid: Vec<&LocationPoint> = self.valid_points().collect();
        let n = valid.len();
        RouteKey(
            valid
                .iter()
                .enumerate()
                .filter_map(|(i, p)| {
                    let mode = (i + 1 < n).then_some(p.transport);
                    p.coordinate().map(|c| (c, mode))
                })
                .collect(),
        )
    }
}

#[cfg(test)]
#[path = "../tests/unit/model/trip.rs"]
mod tests;
