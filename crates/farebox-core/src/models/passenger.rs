//! Passenger snapshot model

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Locally cached view of a passenger account
///
/// `current_balance` reflects the last value this client has observed or
/// locally computed. It is never authoritative until confirmed by a
/// successful sync pull, which replaces the whole snapshot set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassengerSnapshot {
    /// Stable identity, server-assigned
    pub id: String,
    /// Passenger display name
    pub full_name: String,
    /// Signed decimal currency balance
    pub current_balance: Decimal,
    /// Route this passenger is assigned to
    pub route_id: String,
    /// Sponsoring ministry
    pub ministry: String,
    /// Usual boarding area
    pub boarding_area: String,
    /// Optional reference into the legacy passenger registry
    #[serde(default)]
    pub legacy_passenger_id: Option<String>,
    /// Account is active
    pub is_active: bool,
    /// Last update timestamp (unix ms)
    pub updated_at: i64,
}

impl PassengerSnapshot {
    /// Apply a signed balance delta locally, bumping `updated_at`
    pub fn apply_delta(&mut self, delta: Decimal) {
        self.current_balance += delta;
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }

    /// Overwrite the cached balance with a server-confirmed value
    pub fn confirm_balance(&mut self, balance: Decimal) {
        self.current_balance = balance;
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PassengerSnapshot {
        PassengerSnapshot {
            id: "p-1".to_string(),
            full_name: "Amara Obi".to_string(),
            current_balance: "10.00".parse().unwrap(),
            route_id: "r-1".to_string(),
            ministry: "Transport".to_string(),
            boarding_area: "Gate A".to_string(),
            legacy_passenger_id: None,
            is_active: true,
            updated_at: 0,
        }
    }

    #[test]
    fn test_apply_delta() {
        let mut passenger = sample();
        passenger.apply_delta("-2.50".parse().unwrap());
        assert_eq!(passenger.current_balance, "7.50".parse().unwrap());
        assert!(passenger.updated_at > 0);
    }

    #[test]
    fn test_serde_tolerates_missing_legacy_id() {
        let json = r#"{
            "id": "p-9",
            "full_name": "Test",
            "current_balance": "3.25",
            "route_id": "r-2",
            "ministry": "Health",
            "boarding_area": "Gate B",
            "is_active": true,
            "updated_at": 1
        }"#;
        let parsed: PassengerSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.legacy_passenger_id, None);
        assert_eq!(parsed.current_balance, "3.25".parse().unwrap());
    }
}
