// License: GNU Affero General Public License v3 or later
// A copy of GNU AGPL v3 should have been included in this software package in LICENSE.txt.

use chrono::prelude::*;
use sqlx::PgPool;
use uuid::Uuid;

use crate::Result;

/// Power actually generated by a site over one interval.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Generation {
    pub site_uuid: Uuid,
    pub start_utc: NaiveDateTime,
    pub end_utc: NaiveDateTime,
    pub generation_power_kw: f64,
}

impl Generation {
    /// Readings of the given sites starting in `[start, end)`.
    pub async fn in_window(
        pool: &PgPool,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        site_uuids: &[Uuid],
    ) -> Result<Vec<Self>> {
        let rows = sqlx::query_as::<_, Generation>(
            r#"
            SELECT site_uuid, start_utc, end_utc, generation_power_kw FROM generation
                WHERE site_uuid = ANY($1)
                    AND start_utc >= $2
                    AND start_utc < $3"#,
        )
        .bind(site_uuids)
        .bind(start.naive_utc())
        .bind(end.naive_utc())
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }
}
