//! Read-only plan catalog consulted at issuance.

use std::collections::HashMap;

use crate::db::{DbPool, queries};
use crate::error::Result;
use crate::models::Plan;

/// Lookup of plan templates by id or code.
pub trait PlanCatalog: Send + Sync {
    fn find_plan(&self, reference: &str) -> Result<Option<Plan>>;

    /// Every plan, ordered by code.
    fn list_plans(&self) -> Result<Vec<Plan>>;
}

/// Fixed in-memory catalog.
#[derive(Debug, Default, Clone)]
pub struct StaticPlanCatalog {
    plans: HashMap<String, Plan>,
}

impl StaticPlanCatalog {
    pub fn new(plans: impl IntoIterator<Item = Plan>) -> Self {
        Self {
            plans: plans.into_iter().map(|p| (p.code.clone(), p)).collect(),
        }
    }
}

impl PlanCatalog for StaticPlanCatalog {
    fn find_plan(&self, reference: &str) -> Result<Option<Plan>> {
        if let Some(plan) = self.plans.get(reference) {
            return Ok(Some(plan.clone()));
        }
        Ok(self.plans.values().find(|p| p.id == reference).cloned())
    }

    fn list_plans(&self) -> Result<Vec<Plan>> {
        let mut plans: Vec<Plan> = self.plans.values().cloned().collect();
        plans.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(plans)
    }
}

/// Catalog backed by the `plans` table.
#[derive(Clone)]
pub struct DbPlanCatalog {
    db: DbPool,
}

impl DbPlanCatalog {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

impl PlanCatalog for DbPlanCatalog {
    fn find_plan(&self, reference: &str) -> Result<Option<Plan>> {
        let conn = self.db.get()?;
        queries::get_plan(&conn, reference)
    }

    fn list_plans(&self) -> Result<Vec<Plan>> {
        let conn = self.db.get()?;
        queries::list_plans(&conn)
    }
}
