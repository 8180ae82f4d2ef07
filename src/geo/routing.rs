use tracing::warn;

use crate::error::AppError;
use crate::geo::haversine_km;
use crate::models::agent::GeoPoint;
use crate::models::pickup::RouteSummary;

const AVERAGE_SPEED_KMH: f64 = 30.0;

/// Seam for an external directions provider. Implementations should
/// return `AppError::Unavailable` on transport failure; callers go
/// through [`resolve_route`], which degrades to a straight-line
/// estimate instead of failing the operation.
pub trait RouteProvider: Send + Sync {
    fn get_route(&self, origin: &GeoPoint, dest: &GeoPoint) -> Result<RouteSummary, AppError>;
}

/// Fallback provider: great-circle distance at an assumed urban speed.
pub struct StraightLine;

impl RouteProvider for StraightLine {
    fn get_route(&self, origin: &GeoPoint, dest: &GeoPoint) -> Result<RouteSummary, AppError> {
        Ok(straight_line_route(origin, dest))
    }
}

pub fn straight_line_route(origin: &GeoPoint, dest: &GeoPoint) -> RouteSummary {
    let distance_km = haversine_km(origin, dest);
    RouteSummary {
        waypoints: vec![*origin, *dest],
        distance_km,
        duration_min: distance_km / AVERAGE_SPEED_KMH * 60.0,
    }
}

pub fn resolve_route(
    provider: &dyn RouteProvider,
    origin: &GeoPoint,
    dest: &GeoPoint,
) -> RouteSummary {
    match provider.get_route(origin, dest) {
        Ok(route) => route,
        Err(err) => {
            warn!(error = %err, "route provider failed; using straight-line estimate");
            straight_line_route(origin, dest)
        }
    }
}
