use crate::store::{StoreError, TelemetryStore};
use std::sync::Arc;

/// Read API over the telemetry store for downstream consumers
#[derive(Clone)]
pub struct TelemetryQueries {
    store: Arc<dyn TelemetryStore>,
}

impl TelemetryQueries {
    pub fn new(store: Arc<dyn TelemetryStore>) -> Self {
        Self { store }
    }

    /// Latest reported status of a vehicle
    pub async fn current_status(&self, vehicle_id: &str) -> Result<String, StoreError> {
        self.store.latest_status(vehicle_id).await
    }

    /// Listing of the objects in the vehicle's latest detection event
    pub async fn latest_detections_summary(&self, vehicle_id: &str) -> Result<String, StoreError> {
        self.store.latest_detections_summary(vehicle_id).await
    }

    /// Whether the vehicle ever reported an accident
    pub async fn has_accident_history(&self, vehicle_id: &str) -> Result<bool, StoreError> {
        self.store.has_accident_history(vehicle_id).await
    }

    /// Whether the vehicle has never reported an accident
    pub async fn is_clean_record(&self, vehicle_id: &str) -> Result<bool, StoreError> {
        Ok(!self.has_accident_history(vehicle_id).await?)
    }
}
