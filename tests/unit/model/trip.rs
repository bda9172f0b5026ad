use super::*;

fn c(lat: f64, lng: f64) -> Coordinate {
    Coordinate::new(lat, lng)
}

fn resolved_trip() -> Trip {
    let mut trip = Trip::new();
    let w = trip.add_waypoint();
    trip.apply_place(LocationId::Start, c(35.0, 139.0), "A").unwrap();
    trip.apply_place(w, c(35.5, 138.0), "B").unwrap();
    trip.apply_place(LocationId::End, c(34.0, 135.0), "C").unwrap();
    trip.set_transport(w, TransportMode::Plane).unwrap();
    trip
}

#[test]
fn ids_round_trip_through_strings() {
    for id in [LocationId::Start, LocationId::End, LocationId::Waypoint(12)] {
        assert_eq!(id.to_string().parse::<LocationId>().unwrap(), id);
    }
    assert!("waypoint-x".parse::<LocationId>().is_err());
    assert_eq!(
        serde_json::to_string(&LocationId::Waypoint(3)).unwrap(),
        "\"waypoint-3\""
    );
}

#[test]
fn transport_mode_parsing_is_lenient() {
    assert_eq!("fly".parse::<TransportMode>().unwrap(), TransportMode::Plane);
    assert_eq!("CAR".parse::<TransportMode>().unwrap(), TransportMode::Car);
    assert_eq!("foot".parse::<TransportMode>().unwrap(), TransportMode::Walk);
    assert!("teleport".parse::<TransportMode>().is_err());

    let m: TransportMode = serde_json::from_str("\"Plane\"").unwrap();
    assert_eq!(m, TransportMode::Plane);
    assert_eq!(serde_json::to_string(&TransportMode::Bike).unwrap(), "\"Bike\"");
}

#[test]
fn new_trip_has_start_and_end_only() {
    let trip = Trip::new();
    let ids: Vec<_> = trip.points().iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![LocationId::Start, LocationId::End]);
    assert!(trip.leg_requests().is_empty());
}

#[test]
fn waypoints_are_inserted_before_end_and_numbered_uniquely() {
    let mut trip = Trip::new();
    let a = trip.add_waypoint();
    let b = trip.add_waypoint();
    trip.remove_waypoint(a).unwrap();
    let c = trip.add_waypoint();
    assert_ne!(b, c);

    let ids: Vec<_> = trip.points().iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![LocationId::Start, b, c, LocationId::End]);
}

#[test]
fn start_and_end_cannot_be_removed_or_moved() {
    let mut trip = Trip::new();
    assert!(trip.remove_waypoint(LocationId::Start).is_err());
    assert!(trip.move_waypoint(LocationId::End, -1).is_err());
}

#[test]
fn move_waypoint_stays_between_start_and_end() {
    let mut trip = Trip::new();
    let a = trip.add_waypoint();
    let b = trip.add_waypoint();
    trip.move_waypoint(b, -10).unwrap();
    let ids: Vec<_> = trip.points().iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![LocationId::Start, b, a, LocationId::End]);

    trip.move_waypoint(b, 10).unwrap();
    let ids: Vec<_> = trip.points().iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![LocationId::Start, a, b, LocationId::End]);
}

#[test]
fn from_points_enforces_shape() {
    let start = LocationPoint::new(LocationId::Start);
    let end = LocationPoint::new(LocationId::End);
    let w = LocationPoint::new(LocationId::Waypoint(7));

    assert!(Trip::from_points(vec![end.clone(), start.clone()]).is_err());
    assert!(Trip::from_points(vec![start.clone()]).is_err());
    assert!(
        Trip::from_points(vec![start.clone(), start.clone(), end.clone()]).is_err(),
        "second start must be rejected"
    );
    assert!(Trip::from_points(vec![start.clone(), w.clone(), w.clone(), end.clone()]).is_err());

    let mut trip = Trip::from_points(vec![start, w, end]).unwrap();
    assert_eq!(trip.add_waypoint(), LocationId::Waypoint(8));
}

#[test]
fn leg_requests_use_origin_mode_and_skip_invalid_points() {
    let mut trip = resolved_trip();
    let legs = trip.leg_requests();
    assert_eq!(legs.len(), 2);
    assert_eq!(legs[0].mode, TransportMode::Car);
    assert_eq!(legs[1].mode, TransportMode::Plane);
    assert_eq!(legs[1].to, c(34.0, 135.0));

    let w = legs[0].to_id;
    trip.set_error(w, "not found").unwrap();
    let legs = trip.leg_requests();
    assert_eq!(legs.len(), 1);
    assert_eq!(legs[0].from_id, LocationId::Start);
    assert_eq!(legs[0].to_id, LocationId::End);
    assert_eq!(legs[0].mode, TransportMode::Car);
}

#[test]
fn rename_clears_resolution() {
    let mut trip = resolved_trip();
    trip.set_name(LocationId::End, "Kyoto").unwrap();
    let end = trip.get(LocationId::End).unwrap();
    assert!(!end.is_valid());
    assert_eq!(end.name, "Kyoto");
    assert_eq!(trip.valid_count(), 2);
}

#[test]
fn route_key_tracks_coordinates_and_leg_modes_only() {
    let trip = resolved_trip();
    let mut renamed = trip.clone();
    let key = trip.route_key();
    assert_eq!(key.leg_count(), 2);

    // The last point's transport is not part of any leg.
    renamed
        .set_transport(LocationId::End, TransportMode::Walk)
        .unwrap();
    assert_eq!(renamed.route_key(), key);

    renamed
        .set_transport(LocationId::Start, TransportMode::Bike)
        .unwrap();
    assert_ne!(renamed.route_key(), key);
}

#[test]
fn points_serialize_without_unset_fields() {
    let json = serde_json::to_value(LocationPoint::new(LocationId::Start)).unwrap();
    assert_eq!(
        json,
        serde_json::json!({"id": "start", "name": "", "transport": "Car"})
    );
}
