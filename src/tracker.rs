use serde::Deserialize;

use crate::{
    directory::User,
    errors::OrderError,
    orders::{Order, RiderLocation, Role},
};

/// Body of a rider position report.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LocationReport {
    pub lat: f64,
    pub lng: f64,
}

impl LocationReport {
    /// Numeric sanity only; coordinate ranges are not checked.
    pub fn validate(&self) -> Result<(), OrderError> {
        if self.lat.is_finite() && self.lng.is_finite() {
            Ok(())
        } else {
            Err(OrderError::Validation("lat and lng must be finite numbers".into()))
        }
    }

    pub fn stamp(self, now_ms: u64) -> RiderLocation {
        RiderLocation {
            lat: self.lat,
            lng: self.lng,
            timestamp: now_ms,
        }
    }
}

/// Only a rider may report, and only for an order bound to them.
pub fn ensure_rider_role(caller: &User) -> Result<(), OrderError> {
    if caller.role == Role::Rider {
        Ok(())
    } else {
        Err(OrderError::NotAuthorized)
    }
}

pub fn ensure_bound_rider(order: &Order, caller: &User) -> Result<(), OrderError> {
    if order.rider_id == Some(caller.id) {
        Ok(())
    } else {
        Err(OrderError::NotAuthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::{NewOrder, PaymentMethod, Pricing, tests as fixtures};
    use uuid::Uuid;

    fn rider() -> User {
        User {
            id: Uuid::new_v4(),
            name: "r".into(),
            role: Role::Rider,
            phone: None,
        }
    }

    #[test]
    fn test_report_sanity() {
        assert!(LocationReport { lat: 40.0, lng: -73.0 }.validate().is_ok());
        // out-of-range but finite is accepted
        assert!(LocationReport { lat: 123.0, lng: 500.0 }.validate().is_ok());
        assert!(LocationReport { lat: f64::NAN, lng: 0.0 }.validate().is_err());
        assert!(LocationReport { lat: 0.0, lng: f64::INFINITY }.validate().is_err());
    }

    #[test]
    fn test_only_bound_rider_passes() {
        let bound = rider();
        let other = rider();
        let mut order = Order::create(
            NewOrder {
                customer_id: Uuid::new_v4(),
                restaurant_id: Uuid::new_v4(),
                items: vec![fixtures::line(100, 1)],
                delivery_address: fixtures::sample_address(),
                payment_method: PaymentMethod::Cash,
            },
            &Pricing::default(),
            0,
        )
        .unwrap();
        assert!(ensure_bound_rider(&order, &bound).is_err());
        order.rider_id = Some(bound.id);
        assert!(ensure_bound_rider(&order, &bound).is_ok());
        assert!(matches!(
            ensure_bound_rider(&order, &other),
            Err(OrderError::NotAuthorized)
        ));

        let customer = User {
            role: Role::Customer,
            ..rider()
        };
        assert!(ensure_rider_role(&customer).is_err());
        assert!(ensure_rider_role(&bound).is_ok());
    }

    #[test]
    fn test_stamp_sets_timestamp() {
        let loc = LocationReport { lat: 1.5, lng: 2.5 }.stamp(77);
        assert_eq!(
            loc,
            RiderLocation {
                lat: 1.5,
                lng: 2.5,
                timestamp: 77
            }
        );
    }
}
