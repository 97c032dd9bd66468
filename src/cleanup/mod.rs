// License: GNU Affero General Public License v3 or later
// A copy of GNU AGPL v3 should have been included in this software package in LICENSE.txt.

//! Batched deletion of old forecasts, optionally archiving them first.
//!
//! Every pass selects the oldest forecasts before the cutoff, archives them if the
//! pass asks for it, deletes them and starts over until nothing is left. Because
//! selection is always oldest first, an interrupted run is resumed by simply
//! running it again.

use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::site::SiteGroup;
use crate::store::{ForecastStore, SiteFilter};
use crate::{Error, Result};

pub mod archive;
pub mod cutoff;

pub use archive::Archive;

pub const DEFAULT_BATCH_SIZE: i64 = 100;
pub const DEFAULT_MIN_SERVICE_LEVEL: i32 = 1;
pub const DEFAULT_MAX_SITES_PER_GROUP: usize = 100;

/// Which sites get archived before their forecasts are deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ArchiveScope {
    /// Archive the sites of qualifying site groups, then delete the rest unarchived
    GroupSites,
    /// Archive everything that gets deleted
    AllSites,
    /// Never archive
    None,
}

#[derive(Debug, Clone)]
pub struct CleanupConfig {
    pub cutoff: DateTime<Utc>,
    pub batch_size: i64,
    pub sleep: Option<Duration>,
    pub do_delete: bool,
}

#[derive(Debug, Clone)]
pub struct SitePolicy {
    pub archive_scope: ArchiveScope,
    pub min_service_level: i32,
    pub max_sites_per_group: usize,
    /// Restrict the unarchived deletion to the sites of this country
    pub country: Option<String>,
}

impl Default for SitePolicy {
    fn default() -> Self {
        Self {
            archive_scope: ArchiveScope::None,
            min_service_level: DEFAULT_MIN_SERVICE_LEVEL,
            max_sites_per_group: DEFAULT_MAX_SITES_PER_GROUP,
            country: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PurgePass {
    pub name: &'static str,
    pub sites: SiteFilter,
    pub archive: bool,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct PassSummary {
    pub name: &'static str,
    pub batches: usize,
    pub forecasts_deleted: u64,
    pub values_deleted: u64,
    pub archived_files: usize,
    /// Size of the first batch in a dry run
    pub would_delete: Option<usize>,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct PurgeSummary {
    pub passes: Vec<PassSummary>,
}

impl PurgeSummary {
    pub fn forecasts_deleted(&self) -> u64 {
        self.passes.iter().map(|p| p.forecasts_deleted).sum()
    }

    pub fn values_deleted(&self) -> u64 {
        self.passes.iter().map(|p| p.values_deleted).sum()
    }

    pub fn batches(&self) -> usize {
        self.passes.iter().map(|p| p.batches).sum()
    }
}

pub async fn run(
    store: &dyn ForecastStore,
    archive: Option<&Archive>,
    config: &CleanupConfig,
    policy: &SitePolicy,
) -> Result<PurgeSummary> {
    if config.batch_size <= 0 {
        return Err(Error::InvalidConfig(format!(
            "Batch size must be positive, got {}",
            config.batch_size
        )));
    }
    if policy.archive_scope != ArchiveScope::None && archive.is_none() {
        return Err(Error::InvalidConfig(format!(
            "Archive scope '{}' needs an archive destination",
            policy.archive_scope
        )));
    }

    if config.do_delete {
        tracing::info!("Deleting forecasts made before {} (UTC)", config.cutoff);
    } else {
        tracing::info!("Would delete forecasts made before {} (UTC)", config.cutoff);
    }

    let passes = plan_passes(store, policy).await?;

    let mut summary = PurgeSummary::default();
    for pass in &passes {
        let pass_summary = run_pass(store, archive, config, pass).await?;
        summary.passes.push(pass_summary);
    }

    tracing::info!(
        forecasts = summary.forecasts_deleted(),
        values = summary.values_deleted(),
        batches = summary.batches(),
        "Done deleting forecasts made before {}",
        config.cutoff
    );
    Ok(summary)
}

/// Work out the passes to run, archiving passes first.
pub async fn plan_passes(store: &dyn ForecastStore, policy: &SitePolicy) -> Result<Vec<PurgePass>> {
    let delete_sites = match &policy.country {
        Some(country) => {
            let ids = store.site_ids_in_country(country).await?;
            tracing::info!("Found {} sites in {country}", ids.len());
            SiteFilter::Sites(ids)
        }
        None => SiteFilter::All,
    };

    let passes = match policy.archive_scope {
        ArchiveScope::GroupSites => {
            let groups = store.site_groups().await?;
            let archive_sites = archive_site_ids(
                &groups,
                policy.min_service_level,
                policy.max_sites_per_group,
            );
            tracing::info!("Found {} sites to archive", archive_sites.len());
            vec![
                PurgePass {
                    name: "archive",
                    sites: SiteFilter::Sites(archive_sites),
                    archive: true,
                },
                PurgePass {
                    name: "delete",
                    sites: delete_sites,
                    archive: false,
                },
            ]
        }
        ArchiveScope::AllSites => vec![PurgePass {
            name: "archive",
            sites: delete_sites,
            archive: true,
        }],
        ArchiveScope::None => vec![PurgePass {
            name: "delete",
            sites: delete_sites,
            archive: false,
        }],
    };

    Ok(passes)
}

/// Sites of the groups with at least `min_service_level`, at most `max_per_group` per group.
pub fn archive_site_ids(
    groups: &[SiteGroup],
    min_service_level: i32,
    max_per_group: usize,
) -> Vec<Uuid> {
    let mut site_uuids: Vec<Uuid> = Vec::new();
    for group in groups.iter().filter(|g| g.qualifies(min_service_level)) {
        if group.site_uuids.len() > max_per_group {
            tracing::warn!(
                "Site group {} has more than {max_per_group} sites, only saving {max_per_group}",
                group.site_group_name
            );
        }
        for site_uuid in group.site_uuids.iter().take(max_per_group) {
            if !site_uuids.contains(site_uuid) {
                site_uuids.push(*site_uuid);
            }
        }
    }
    site_uuids
}

async fn run_pass(
    store: &dyn ForecastStore,
    archive: Option<&Archive>,
    config: &CleanupConfig,
    pass: &PurgePass,
) -> Result<PassSummary> {
    let mut summary = PassSummary {
        name: pass.name,
        ..PassSummary::default()
    };

    if pass.sites.as_slice().is_some_and(|s| s.is_empty()) {
        tracing::info!(pass = pass.name, "No sites to process, skipping");
        return Ok(summary);
    }

    let archive = match (pass.archive, archive) {
        (true, Some(a)) => Some(a),
        (true, None) => {
            return Err(Error::InvalidConfig(format!(
                "Pass {} archives but there is no archive destination",
                pass.name
            )))
        }
        (false, _) => None,
    };
    let subdir = cutoff::archive_dir_name(&config.cutoff);
    let mut batch_index = match archive {
        Some(archive) if config.do_delete => archive.next_index(&subdir).await?,
        _ => 0,
    };
    if batch_index > 0 {
        tracing::info!(
            pass = pass.name,
            "Archive {subdir} already holds batches, continuing at {batch_index}"
        );
    }

    loop {
        let forecast_uuids = store
            .oldest_forecasts(config.cutoff, config.batch_size, &pass.sites)
            .await?;
        tracing::debug!(pass = pass.name, "Selected {} forecasts", forecast_uuids.len());

        if forecast_uuids.is_empty() {
            tracing::info!(
                pass = pass.name,
                forecasts = summary.forecasts_deleted,
                values = summary.values_deleted,
                "A total of {} forecasts (and corresponding values) were deleted",
                summary.forecasts_deleted
            );
            return Ok(summary);
        }

        if !config.do_delete {
            tracing::info!(
                pass = pass.name,
                "Would delete data from {} forecasts in a first batch",
                forecast_uuids.len()
            );
            summary.would_delete = Some(forecast_uuids.len());
            return Ok(summary);
        }

        if let Some(archive) = archive {
            let rows = store.archive_batch(&forecast_uuids).await?;
            let written = archive.write_batch(&subdir, batch_index, &rows).await?;
            tracing::info!(
                pass = pass.name,
                batch = batch_index,
                rows = written.rows,
                "Archived {} files",
                written.paths.len()
            );
            summary.archived_files += written.paths.len();
        }

        let deleted = store.delete_forecasts(&forecast_uuids).await?;
        tracing::info!(
            pass = pass.name,
            batch = batch_index,
            forecasts = deleted.forecasts,
            values = deleted.values,
            "Deleted batch"
        );

        summary.batches += 1;
        summary.forecasts_deleted += deleted.forecasts;
        summary.values_deleted += deleted.values;
        batch_index += 1;

        if let Some(sleep) = config.sleep {
            tracing::debug!("Sleeping for {sleep:?}");
            tokio::time::sleep(sleep).await;
        }
    }
}
