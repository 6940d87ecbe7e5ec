//! Shared test fixtures: a scripted authoritative store and model builders

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::models::{CurrentUser, PassengerSnapshot, Role};
use crate::remote::{
    AuthoritativeStore, PassengerScope, PassengerUpsert, RemoteError, RemoteResult,
};
use crate::session::AuthSession;

pub fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

pub fn passenger(id: &str, route: &str, balance: &str) -> PassengerSnapshot {
    PassengerSnapshot {
        id: id.to_string(),
        full_name: format!("Passenger {id}"),
        current_balance: dec(balance),
        route_id: route.to_string(),
        ministry: "Transport".to_string(),
        boarding_area: "Gate A".to_string(),
        legacy_passenger_id: None,
        is_active: true,
        updated_at: 0,
    }
}

pub fn conductor_session() -> AuthSession {
    AuthSession {
        access_token: "tok".to_string(),
        expires_at: chrono::Utc::now().timestamp() + 3600,
        user: CurrentUser {
            id: "u-1".to_string(),
            role: Role::Conductor,
            conductor_id: Some("c-1".to_string()),
            assigned_route_id: Some("r-1".to_string()),
        },
    }
}

#[derive(Default)]
struct MockState {
    passengers: HashMap<String, PassengerSnapshot>,
    fail_pushes: bool,
    calls: Vec<(String, String, Decimal)>,
    user: Option<CurrentUser>,
}

/// Scripted server of record
#[derive(Default)]
pub struct MockRemote {
    state: std::sync::Mutex<MockState>,
}

impl MockRemote {
    pub fn with_passengers(passengers: &[PassengerSnapshot]) -> Arc<Self> {
        let remote = Self::default();
        {
            let mut state = remote.state.lock().unwrap();
            for p in passengers {
                state.passengers.insert(p.id.clone(), p.clone());
            }
        }
        Arc::new(remote)
    }

    pub fn set_fail_pushes(&self, fail: bool) {
        self.state.lock().unwrap().fail_pushes = fail;
    }

    pub fn delete(&self, passenger_id: &str) {
        self.state.lock().unwrap().passengers.remove(passenger_id);
    }

    pub fn calls(&self) -> Vec<(String, String, Decimal)> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn balance(&self, passenger_id: &str) -> Decimal {
        self.state.lock().unwrap().passengers[passenger_id].current_balance
    }

    pub fn set_user(&self, user: Option<CurrentUser>) {
        self.state.lock().unwrap().user = user;
    }
}

#[async_trait]
impl AuthoritativeStore for MockRemote {
    async fn board_passenger(
        &self,
        passenger_id: &str,
        _conductor_id: &str,
        _route_id: &str,
        fare: Decimal,
    ) -> RemoteResult<Decimal> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(("board".to_string(), passenger_id.to_string(), fare));
        if state.fail_pushes {
            return Err(RemoteError::Rejected {
                message: "server unavailable".to_string(),
                status: 503,
            });
        }
        let Some(p) = state.passengers.get_mut(passenger_id) else {
            return Err(RemoteError::NotFound);
        };
        p.current_balance -= fare;
        Ok(p.current_balance)
    }

    async fn topup_passenger(
        &self,
        passenger_id: &str,
        amount: Decimal,
        _notes: Option<&str>,
    ) -> RemoteResult<Decimal> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(("topup".to_string(), passenger_id.to_string(), amount));
        if state.fail_pushes {
            return Err(RemoteError::Rejected {
                message: "server unavailable".to_string(),
                status: 503,
            });
        }
        let Some(p) = state.passengers.get_mut(passenger_id) else {
            return Err(RemoteError::NotFound);
        };
        p.current_balance += amount;
        Ok(p.current_balance)
    }

    async fn list_passengers(&self, scope: &PassengerScope) -> RemoteResult<Vec<PassengerSnapshot>> {
        let state = self.state.lock().unwrap();
        let mut passengers: Vec<_> = state
            .passengers
            .values()
            .filter(|p| match scope {
                PassengerScope::All => true,
                PassengerScope::Route(route) => p.route_id == *route,
            })
            .cloned()
            .collect();
        passengers.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(passengers)
    }

    async fn get_current_user(&self) -> RemoteResult<Option<CurrentUser>> {
        Ok(self.state.lock().unwrap().user.clone())
    }

    async fn ping(&self) -> bool {
        true
    }

    async fn create_passenger(&self, fields: &PassengerUpsert) -> RemoteResult<PassengerSnapshot> {
        let mut state = self.state.lock().unwrap();
        let id = format!("p-{}", state.passengers.len() + 1);
        let created = PassengerSnapshot {
            id: id.clone(),
            full_name: fields.full_name.clone(),
            current_balance: Decimal::ZERO,
            route_id: fields.route_id.clone(),
            ministry: fields.ministry.clone(),
            boarding_area: fields.boarding_area.clone(),
            legacy_passenger_id: fields.legacy_passenger_id.clone(),
            is_active: fields.is_active,
            updated_at: chrono::Utc::now().timestamp_millis(),
        };
        state.passengers.insert(id, created.clone());
        Ok(created)
    }

    async fn update_passenger(
        &self,
        passenger_id: &str,
        fields: &PassengerUpsert,
    ) -> RemoteResult<PassengerSnapshot> {
        let mut state = self.state.lock().unwrap();
        let Some(p) = state.passengers.get_mut(passenger_id) else {
            return Err(RemoteError::NotFound);
        };
        p.full_name = fields.full_name.clone();
        p.route_id = fields.route_id.clone();
        p.ministry = fields.ministry.clone();
        p.boarding_area = fields.boarding_area.clone();
        p.is_active = fields.is_active;
        Ok(p.clone())
    }

    async fn delete_passenger(&self, passenger_id: &str) -> RemoteResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.passengers.remove(passenger_id).is_none() {
            return Err(RemoteError::NotFound);
        }
        Ok(())
    }
}
