use pkg_types::Quantity;
use pkg_types::pool::ResourcePool;
use pkg_types::validate::{validate_name, validate_resource_list};

use crate::error::{AdmissionError, AdmissionResult, deny};

/// Mutating guard for pool create and update: every config flag gets a
/// concrete value, and zero defaults are materialised for hard keys that
/// have none.
pub fn default_pool(pool: &mut ResourcePool) {
    let config = &mut pool.spec.config;
    config.ordered_queue.get_or_insert(false);
    config.defaults_assign_zero.get_or_insert(false);
    config.delete_bound_resources.get_or_insert(false);

    if pool.spec.config.defaults_assign_zero() {
        for name in pool.spec.quota.hard.keys() {
            pool.spec
                .defaults
                .entry(name.clone())
                .or_insert_with(Quantity::zero);
        }
    }
}

/// Shape checks shared by create and update.
pub fn validate_pool(pool: &ResourcePool) -> AdmissionResult<()> {
    validate_name(pool.name()).map_err(denied)?;
    validate_resource_list("spec.quota.hard", &pool.spec.quota.hard).map_err(denied)?;
    validate_resource_list("spec.defaults", &pool.spec.defaults).map_err(denied)?;
    for selector in &pool.spec.selectors {
        selector.validate().map_err(denied)?;
    }
    Ok(())
}

/// A hard limit may not drop below what is claimed in the last persisted
/// status, and a key with live usage may not be removed.
pub fn validate_pool_update(old: &ResourcePool, new: &ResourcePool) -> AdmissionResult<()> {
    validate_pool(new)?;
    if old.spec.quota.hard == new.spec.quota.hard {
        return Ok(());
    }

    for (name, claimed) in &old.status.allocation.claimed {
        match new.spec.quota.hard.get(name) {
            None if claimed.is_zero() => {}
            None => {
                return deny(format!(
                    "can not remove resource {} as it is still being allocated. \
                     Remove corresponding claims or keep the resources in the pool",
                    name
                ));
            }
            Some(limit) if limit < claimed => {
                return deny(format!(
                    "can not reduce {} usage to {} because quantity {} is claimed. \
                     Remove corresponding claims or keep the resources in the pool",
                    name, limit, claimed
                ));
            }
            Some(_) => {}
        }
    }
    Ok(())
}

fn denied(e: anyhow::Error) -> AdmissionError {
    AdmissionError::Denied(e.to_string())
}
