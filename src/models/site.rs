// License: GNU Affero General Public License v3 or later
// A copy of GNU AGPL v3 should have been included in this software package in LICENSE.txt.

use sqlx::PgPool;
use uuid::Uuid;

use crate::Result;

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Site {
    pub site_uuid: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub capacity_kw: f64,
    pub country: Option<String>,
}

impl Site {
    pub async fn all(pool: &PgPool) -> Result<Vec<Self>> {
        let sites = sqlx::query_as::<_, Site>(
            r#"
            SELECT site_uuid, latitude, longitude, capacity_kw, country FROM sites
                ORDER BY site_uuid"#,
        )
        .fetch_all(pool)
        .await?;

        Ok(sites)
    }

    pub async fn ids_in_country(pool: &PgPool, country: &str) -> Result<Vec<Uuid>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT site_uuid FROM sites
                WHERE country = $1
                ORDER BY site_uuid"#,
        )
        .bind(country)
        .fetch_all(pool)
        .await?;

        Ok(ids)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SiteGroup {
    pub site_group_uuid: Uuid,
    pub site_group_name: String,
    pub service_level: Option<i32>,
    pub site_uuids: Vec<Uuid>,
}

#[derive(Debug, sqlx::FromRow)]
struct DbSiteGroup {
    site_group_uuid: Uuid,
    site_group_name: String,
    service_level: Option<i32>,
}

impl SiteGroup {
    /// All site groups with their member sites.
    pub async fn all(pool: &PgPool) -> Result<Vec<Self>> {
        let mut tx = pool.begin().await?;
        let rows = sqlx::query_as::<_, DbSiteGroup>(
            r#"
            SELECT site_group_uuid, site_group_name, service_level FROM site_groups
                ORDER BY site_group_name"#,
        )
        .fetch_all(&mut *tx)
        .await?;

        let mut groups = Vec::with_capacity(rows.len());
        for row in rows {
            let site_uuids: Vec<Uuid> = sqlx::query_scalar(
                r#"
                SELECT site_uuid FROM site_group_sites
                    WHERE site_group_uuid = $1
                    ORDER BY site_uuid"#,
            )
            .bind(row.site_group_uuid)
            .fetch_all(&mut *tx)
            .await?;

            groups.push(SiteGroup {
                site_group_uuid: row.site_group_uuid,
                site_group_name: row.site_group_name,
                service_level: row.service_level,
                site_uuids,
            });
        }
        tx.commit().await?;

        Ok(groups)
    }

    pub fn qualifies(&self, min_service_level: i32) -> bool {
        self.service_level
            .is_some_and(|level| level >= min_service_level)
    }
}
