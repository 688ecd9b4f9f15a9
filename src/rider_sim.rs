//! Rider simulator: walks a rider along a straight line between two points and
//! reports each step to the location endpoint.
//!
//! Useful for watching the tracking channel end to end:
//!
//! ```text
//! delivery_order_engine ride --token <rider id> --order <order id> \
//!     --from 40.7128,-74.0060 --to 40.7306,-73.9866 --steps 20
//! ```
//!
//! Each report gets a little uniform jitter so consecutive points are not
//! perfectly collinear. The order must already be bound to the rider.

use std::time::{Duration, Instant};

use rand::Rng;
use reqwest::Client;
use serde_json::json;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::orders::{GeoPoint, OrderId, UserId};

#[derive(Clone, Debug)]
pub struct RideConfig {
    pub api_base: String,
    pub token: UserId,
    pub order_id: OrderId,
    pub from: GeoPoint,
    pub to: GeoPoint,
    pub steps: u32,
    pub interval: Duration,
    /// Max absolute jitter, in degrees, added to each coordinate.
    pub jitter: f64,
}

/// Parses `lat,lng`.
pub fn parse_point(s: &str) -> Result<GeoPoint, String> {
    let (lat, lng) = s
        .split_once(',')
        .ok_or_else(|| format!("expected lat,lng but got {:?}", s))?;
    let lat: f64 = lat.trim().parse().map_err(|e| format!("bad lat: {}", e))?;
    let lng: f64 = lng.trim().parse().map_err(|e| format!("bad lng: {}", e))?;
    Ok(GeoPoint { lat, lng })
}

/// Parses a jitter amount in degrees. Must be finite and within `0..=1`.
pub fn parse_jitter(s: &str) -> Result<f64, String> {
    let jitter: f64 = s.trim().parse().map_err(|e| format!("bad jitter: {}", e))?;
    if !(0.0..=1.0).contains(&jitter) {
        return Err(format!("jitter must be between 0 and 1 degrees, got {}", s));
    }
    Ok(jitter)
}

/// Point `step` of `steps` on the segment from `from` to `to`.
pub fn waypoint(from: GeoPoint, to: GeoPoint, step: u32, steps: u32) -> GeoPoint {
    if steps == 0 {
        return to;
    }
    let t = f64::from(step.min(steps)) / f64::from(steps);
    GeoPoint {
        lat: from.lat + (to.lat - from.lat) * t,
        lng: from.lng + (to.lng - from.lng) * t,
    }
}

pub async fn send_location(
    client: &Client,
    cfg: &RideConfig,
    point: GeoPoint,
) -> anyhow::Result<serde_json::Value> {
    let ack = client
        .post(format!(
            "{}/orders/{}/rider-location",
            cfg.api_base.trim_end_matches('/'),
            cfg.order_id
        ))
        .bearer_auth(cfg.token)
        .json(&json!({ "lat": point.lat, "lng": point.lng }))
        .send()
        .await?
        .error_for_status()?
        .json::<serde_json::Value>()
        .await?;
    Ok(ack)
}

/// Posts `steps + 1` location reports, one per `interval`, stopping early when
/// `cancel_token` fires.
pub async fn run_ride(cfg: RideConfig, cancel_token: CancellationToken) -> anyhow::Result<()> {
    let client = Client::new();
    let start = Instant::now();
    let mut sent = 0u32;

    for step in 0..=cfg.steps {
        let mut point = waypoint(cfg.from, cfg.to, step, cfg.steps);
        if cfg.jitter > 0.0 {
            let mut rng = rand::rng();
            point.lat += rng.random_range(-cfg.jitter..=cfg.jitter);
            point.lng += rng.random_range(-cfg.jitter..=cfg.jitter);
        }
        send_location(&client, &cfg, point).await?;
        sent += 1;
        println!(
            "[{:.1}s] step {}/{} lat={:.5} lng={:.5}",
            start.elapsed().as_secs_f64(),
            step,
            cfg.steps,
            point.lat,
            point.lng
        );

        if step == cfg.steps {
            break;
        }
        tokio::select! {
            _ = cancel_token.cancelled() => {
                tracing::info!("received shutdown, stopping ride");
                break;
            }
            _ = sleep(cfg.interval) => {}
        }
    }
    println!("--- done --- {} updates sent", sent);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_point() {
        let p = parse_point("40.5, -73.25").unwrap();
        assert_eq!(p, GeoPoint { lat: 40.5, lng: -73.25 });
        assert!(parse_point("40.5").is_err());
        assert!(parse_point("north,-73").is_err());
    }

    #[test]
    fn test_parse_jitter() {
        assert_eq!(parse_jitter("0.0001"), Ok(0.0001));
        assert_eq!(parse_jitter("0"), Ok(0.0));
        for bad in ["inf", "-inf", "NaN", "-1", "1e308", "wide"] {
            assert!(parse_jitter(bad).is_err(), "{} accepted", bad);
        }
    }

    #[test]
    fn test_waypoints_walk_the_segment() {
        let from = GeoPoint { lat: 0.0, lng: 0.0 };
        let to = GeoPoint { lat: 10.0, lng: -20.0 };
        assert_eq!(waypoint(from, to, 0, 4), from);
        assert_eq!(waypoint(from, to, 2, 4), GeoPoint { lat: 5.0, lng: -10.0 });
        assert_eq!(waypoint(from, to, 4, 4), to);
        assert_eq!(waypoint(from, to, 9, 4), to);
        assert_eq!(waypoint(from, to, 0, 0), to);
    }
}
