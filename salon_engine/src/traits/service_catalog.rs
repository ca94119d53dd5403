use chrono::Weekday;

use crate::{
    db_types::{OperatingHours, ServiceQuote},
    traits::StorageError,
};

/// Read access to the shop catalog. The catalog itself is managed elsewhere.
#[allow(async_fn_in_trait)]
pub trait ServiceCatalog: Clone {
    /// Returns `None` if the service does not exist, belongs to another shop, or is inactive.
    async fn fetch_service_quote(&self, shop_id: &str, service_id: &str) -> Result<Option<ServiceQuote>, StorageError>;

    /// Returns `None` if the shop is closed on that weekday.
    async fn fetch_operating_hours(
        &self,
        shop_id: &str,
        weekday: Weekday,
    ) -> Result<Option<OperatingHours>, StorageError>;
}
