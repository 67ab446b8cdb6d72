//! Client vouchers ("bonos").

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::backend::Backend;
use crate::error::BookingError;
use crate::models::{ClientBono, Service};

/// How long an active-voucher list is served from memory.
pub const VOUCHER_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoucherList {
    pub vouchers: Vec<ClientBono>,
    pub degraded: bool,
}

pub struct VoucherBook {
    backend: Arc<dyn Backend>,
    ttl: Duration,
    active: DashMap<String, (Instant, Vec<ClientBono>)>,
}

impl VoucherBook {
    pub fn new(backend: Arc<dyn Backend>, ttl: Duration) -> Self {
        Self {
            backend,
            ttl,
            active: DashMap::new(),
        }
    }

    /// Active vouchers: the procedure first, the table on failure. Non-empty
    /// results are cached unless `refresh` is set.
    pub async fn active(&self, client_id: &str, refresh: bool) -> VoucherList {
        if !refresh {
            if let Some(hit) = self.active.get(client_id) {
                let (at, vouchers) = hit.value();
                if at.elapsed() < self.ttl {
                    return VoucherList {
                        vouchers: vouchers.clone(),
                        degraded: false,
                    };
                }
            }
        }

        let fetched = match self.backend.client_active_bonos(client_id).await {
            Ok(v) => Ok(v),
            Err(e) => {
                tracing::warn!("active bonos procedure failed, reading table: {:#}", e);
                self.backend.client_bonos(client_id, true).await
            }
        };
        match fetched {
            Ok(vouchers) => {
                if vouchers.is_empty() {
                    self.active.remove(client_id);
                } else {
                    self.active
                        .insert(client_id.to_string(), (Instant::now(), vouchers.clone()));
                }
                VoucherList {
                    vouchers,
                    degraded: false,
                }
            }
            Err(e) => {
                tracing::error!("vouchers for client {} unavailable: {:#}", client_id, e);
                VoucherList {
                    vouchers: Vec::new(),
                    degraded: true,
                }
            }
        }
    }

    /// Used-up vouchers, newest purchase first.
    pub async fn expired(&self, client_id: &str) -> VoucherList {
        match self.backend.client_bonos(client_id, false).await {
            Ok(mut vouchers) => {
                vouchers.sort_by(|a, b| b.purchase_date.cmp(&a.purchase_date));
                VoucherList {
                    vouchers,
                    degraded: false,
                }
            }
            Err(e) => {
                tracing::error!("expired vouchers for client {} unavailable: {:#}", client_id, e);
                VoucherList {
                    vouchers: Vec::new(),
                    degraded: true,
                }
            }
        }
    }

    pub fn invalidate(&self, client_id: &str) {
        self.active.remove(client_id);
    }

    /// The voucher's services matching `service_ids`, in request order.
    /// Every id must be covered by the voucher and sessions must remain.
    pub async fn redeemable_services(
        &self,
        client_id: &str,
        voucher_id: &str,
        service_ids: &[i64],
    ) -> Result<Vec<Service>, BookingError> {
        let list = self.active(client_id, false).await;
        if list.degraded {
            return Err(BookingError::Lookup("vouchers unavailable".into()));
        }
        let voucher = list
            .vouchers
            .into_iter()
            .find(|v| v.id == voucher_id)
            .ok_or_else(|| BookingError::NotFound(format!("voucher {voucher_id}")))?;
        if voucher.remaining_sessions <= 0 {
            return Err(BookingError::InvalidInput("voucher has no sessions left".into()));
        }
        if service_ids.is_empty() {
            return Err(BookingError::MissingData("services"));
        }
        service_ids
            .iter()
            .map(|id| {
                voucher
                    .services
                    .iter()
                    .find(|s| s.id == *id)
                    .cloned()
                    .ok_or_else(|| {
                        BookingError::InvalidInput(format!("service {id} is not part of this voucher"))
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::{self, FakeBackend};

    fn bono(id: &str, remaining: i64, purchased: &str) -> ClientBono {
        ClientBono {
            id: id.into(),
            name: "Bono 5 manicuras".into(),
            bono_type: Some("sesiones".into()),
            remaining_sessions: remaining,
            total_sessions: Some(5),
            purchase_date: Some(purchased.into()),
            services: vec![fake::service(1, "Manicura", 30, 20.0)],
        }
    }

    fn book(backend: &Arc<FakeBackend>) -> VoucherBook {
        VoucherBook::new(backend.clone(), VOUCHER_CACHE_TTL)
    }

    #[tokio::test]
    async fn test_active_is_cached_until_refresh() {
        let backend = Arc::new(FakeBackend::new());
        backend.state().active_bonos = vec![bono("b1", 3, "2026-01-10")];
        let vouchers = book(&backend);

        assert_eq!(vouchers.active("c1", false).await.vouchers.len(), 1);
        vouchers.active("c1", false).await;
        assert_eq!(backend.call_count("client_active_bonos"), 1);

        vouchers.active("c1", true).await;
        assert_eq!(backend.call_count("client_active_bonos"), 2);
    }

    #[tokio::test]
    async fn test_empty_result_is_not_cached() {
        let backend = Arc::new(FakeBackend::new());
        let vouchers = book(&backend);
        vouchers.active("c1", false).await;
        vouchers.active("c1", false).await;
        assert_eq!(backend.call_count("client_active_bonos"), 2);
    }

    #[tokio::test]
    async fn test_procedure_failure_falls_back_to_table() {
        let backend = Arc::new(FakeBackend::new());
        {
            let mut s = backend.state();
            s.fail.insert("client_active_bonos");
            s.active_bonos = vec![bono("b1", 2, "2026-01-10")];
        }
        let list = book(&backend).active("c1", false).await;
        assert!(!list.degraded);
        assert_eq!(list.vouchers[0].id, "b1");
        assert_eq!(backend.call_count("client_bonos"), 1);
    }

    #[tokio::test]
    async fn test_both_failing_is_degraded() {
        let backend = Arc::new(FakeBackend::new());
        {
            let mut s = backend.state();
            s.fail.insert("client_active_bonos");
            s.fail.insert("client_bonos");
        }
        let list = book(&backend).active("c1", false).await;
        assert!(list.degraded);
        assert!(list.vouchers.is_empty());
    }

    #[tokio::test]
    async fn test_expired_newest_first() {
        let backend = Arc::new(FakeBackend::new());
        backend.state().expired_bonos = vec![
            bono("old", 0, "2025-05-01"),
            bono("new", 0, "2026-02-01"),
        ];
        let list = book(&backend).expired("c1").await;
        let ids: Vec<&str> = list.vouchers.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);
    }

    #[tokio::test]
    async fn test_redeemable_services() {
        let backend = Arc::new(FakeBackend::new());
        backend.state().active_bonos = vec![bono("b1", 1, "2026-01-10")];
        let vouchers = book(&backend);

        let services = vouchers.redeemable_services("c1", "b1", &[1]).await.unwrap();
        assert_eq!(services[0].id, 1);
        assert!(matches!(
            vouchers.redeemable_services("c1", "b1", &[2]).await,
            Err(BookingError::InvalidInput(_))
        ));
        assert!(matches!(
            vouchers.redeemable_services("c1", "zz", &[1]).await,
            Err(BookingError::NotFound(_))
        ));
    }
}
