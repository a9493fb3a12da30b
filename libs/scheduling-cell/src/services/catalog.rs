// libs/scheduling-cell/src/services/catalog.rs
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::models::{SchedulingError, TimeSlot};
use crate::services::rows_to;

/// Thin accessors over the slot table. The catalog holds no policy; it is the
/// source of truth for slot existence and consumption state, mutated together
/// with the appointment transition that triggers it.
pub struct SlotCatalogService {
    supabase: Arc<SupabaseClient>,
}

impl SlotCatalogService {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    pub async fn find_slot(
        &self,
        doctor_id: Uuid,
        slot_id: Uuid,
        auth_token: &str,
    ) -> Result<TimeSlot, SchedulingError> {
        debug!("Fetching slot {} for doctor {}", slot_id, doctor_id);

        let path = format!(
            "/rest/v1/time_slots?id=eq.{}&doctor_id=eq.{}",
            slot_id, doctor_id
        );
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        let mut slots: Vec<TimeSlot> = rows_to(result)?;
        let slot = slots.pop().ok_or(SchedulingError::SlotUnavailable)?;
        slot.validate()?;

        Ok(slot)
    }

    /// Flip a slot to consumed. Expected to run in the same unit of work as
    /// the appointment mutation that claims it.
    pub async fn mark_consumed(&self, slot_id: Uuid, auth_token: &str) -> Result<(), SchedulingError> {
        debug!("Marking slot {} consumed", slot_id);

        let path = format!("/rest/v1/time_slots?id=eq.{}", slot_id);
        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(json!({ "is_available": false })),
                Some(representation_headers()),
            )
            .await?;

        if result.is_empty() {
            return Err(SchedulingError::DatabaseError(format!(
                "failed to mark slot {} consumed",
                slot_id
            )));
        }

        Ok(())
    }

    /// Release a slot back to bookable. The filter skips slots held by a
    /// time-off interval; those stay blocked until the declaration is lifted.
    pub async fn release(&self, slot_id: Uuid, auth_token: &str) -> Result<(), SchedulingError> {
        debug!("Releasing slot {}", slot_id);

        let path = format!("/rest/v1/time_slots?id=eq.{}&time_off=eq.false", slot_id);
        let _: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(json!({ "is_available": true })),
                Some(representation_headers()),
            )
            .await?;

        Ok(())
    }
}

pub(crate) fn representation_headers() -> reqwest::header::HeaderMap {
    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert(
        "Prefer",
        reqwest::header::HeaderValue::from_static("return=representation"),
    );
    headers
}
