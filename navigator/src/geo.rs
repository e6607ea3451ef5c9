//! Great-circle distance and turn angles between coordinates.

use wayfinder_types::Coordinate;

/// Earth radius in meters (WGS84 mean).
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Haversine distance between two coordinates, meters.
pub fn distance(a: &Coordinate, b: &Coordinate) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Signed turn angle at `current` when walking `previous → current → next`, degrees in (-180, 180].
///
/// Magnitude comes from the law of cosines on the triangle's side lengths; the
/// sign from the cross product of `(previous - current)` and `(next - current)`
/// taken in (lat, lon) order: negative cross product is a right turn (positive
/// angle), positive is a left turn (negative angle).
///
/// Degenerate input (coincident points) yields 0.0 instead of NaN.
pub fn turn_angle(current: &Coordinate, previous: &Coordinate, next: &Coordinate) -> f64 {
    let to_prev = distance(current, previous);
    let to_next = distance(current, next);
    if to_prev <= f64::EPSILON || to_next <= f64::EPSILON {
        return 0.0;
    }
    let across = distance(previous, next);

    let cos_interior = ((to_prev * to_prev + to_next * to_next - across * across)
        / (2.0 * to_prev * to_next))
        .clamp(-1.0, 1.0);
    let magnitude = 180.0 - cos_interior.acos().to_degrees();

    let (ax, ay) = (previous.lat - current.lat, previous.lon - current.lon);
    let (bx, by) = (next.lat - current.lat, next.lon - current.lon);
    let cross = ax * by - ay * bx;

    if cross > 0.0 {
        -magnitude
    } else {
        magnitude
    }
}
