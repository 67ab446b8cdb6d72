use futures::future::join_all;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::backend::Backend;
use crate::error::BookingError;
use crate::models::{Professional, Service};

/// Pseudo-category meaning "no category filter".
pub const ALL_CATEGORIES: &str = "Todos";

/// Services with `professional_ids` filled from the skills table. A service
/// whose skills lookup fails keeps an empty list.
pub async fn load_services(backend: &dyn Backend) -> anyhow::Result<Vec<Service>> {
    let mut services = backend.services().await?;
    let skills = join_all(
        services
            .iter()
            .map(|s| backend.qualified_professionals(s.id)),
    )
    .await;
    for (service, ids) in services.iter_mut().zip(skills) {
        service.professional_ids = ids.unwrap_or_else(|e| {
            tracing::warn!("skills for service {} unavailable: {:#}", service.id, e);
            Vec::new()
        });
    }
    Ok(services)
}

/// `Todos` followed by each distinct category in first-seen order.
pub fn categories(services: &[Service]) -> Vec<String> {
    let mut out = vec![ALL_CATEGORIES.to_string()];
    for s in services {
        if !out.contains(&s.category) {
            out.push(s.category.clone());
        }
    }
    out
}

/// Category match (or `Todos`) and case-insensitive name search.
pub fn filter_services<'a>(
    services: &'a [Service],
    category: Option<&str>,
    term: Option<&str>,
) -> Vec<&'a Service> {
    let term = term.unwrap_or_default().to_lowercase();
    services
        .iter()
        .filter(|s| match category {
            None | Some(ALL_CATEGORIES) => true,
            Some(c) => s.category == c,
        })
        .filter(|s| s.name.to_lowercase().contains(&term))
        .collect()
}

/// Professionals qualified for every one of `services`.
pub fn qualified_for<'a>(
    professionals: &'a [Professional],
    services: &[Service],
) -> Vec<&'a Professional> {
    professionals
        .iter()
        .filter(|p| services.iter().all(|s| s.professional_ids.contains(&p.id)))
        .collect()
}

struct Cached {
    at: Instant,
    services: Arc<Vec<Service>>,
}

/// Reference-data front with a short-lived service cache.
pub struct Catalog {
    backend: Arc<dyn Backend>,
    ttl: Duration,
    cached: Mutex<Option<Cached>>,
}

impl Catalog {
    pub fn new(backend: Arc<dyn Backend>, ttl: Duration) -> Self {
        Self {
            backend,
            ttl,
            cached: Mutex::new(None),
        }
    }

    fn fresh(&self) -> Option<Arc<Vec<Service>>> {
        let cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        cached
            .as_ref()
            .filter(|c| c.at.elapsed() < self.ttl)
            .map(|c| c.services.clone())
    }

    pub async fn services(&self) -> Result<Arc<Vec<Service>>, BookingError> {
        if let Some(services) = self.fresh() {
            return Ok(services);
        }
        let services = Arc::new(load_services(self.backend.as_ref()).await.map_err(|e| {
            tracing::error!("loading services failed: {:#}", e);
            BookingError::Lookup(format!("{e:#}"))
        })?);
        *self.cached.lock().unwrap_or_else(PoisonError::into_inner) = Some(Cached {
            at: Instant::now(),
            services: services.clone(),
        });
        Ok(services)
    }

    pub async fn service(&self, id: i64) -> Result<Service, BookingError> {
        self.services()
            .await?
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or_else(|| BookingError::NotFound(format!("service {id}")))
    }

    /// Services in the order of `ids`; duplicates are kept.
    pub async fn services_by_id(&self, ids: &[i64]) -> Result<Vec<Service>, BookingError> {
        let all = self.services().await?;
        ids.iter()
            .map(|id| {
                all.iter()
                    .find(|s| s.id == *id)
                    .cloned()
                    .ok_or_else(|| BookingError::NotFound(format!("service {id}")))
            })
            .collect()
    }

    pub async fn professionals(&self) -> Result<Vec<Professional>, BookingError> {
        self.backend.professionals().await.map_err(|e| {
            tracing::error!("loading professionals failed: {:#}", e);
            BookingError::Lookup(format!("{e:#}"))
        })
    }

    pub async fn professional(&self, id: &str) -> Result<Professional, BookingError> {
        self.backend.professional(id).await.map_err(|e| {
            tracing::warn!("professional {} lookup failed: {:#}", id, e);
            BookingError::NotFound(format!("professional {id}"))
        })
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }
}
