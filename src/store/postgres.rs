use super::{
    MeasurementRow, MeasurementStore, Observation, SeriesQuery, SeriesSource, VariableInsert,
};
use crate::error::{CoreError, CoreResult};
use crate::history::aggregation::Aggregation;
use crate::history::buckets::fixed_origin;
use crate::history::interval::Step;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

/// Four binds per row keeps a chunk well below the Postgres bind limit.
const INSERT_CHUNK_ROWS: usize = 4096;

#[derive(Clone)]
pub struct PgMeasurementStore {
    pool: PgPool,
}

impl PgMeasurementStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn observation(row: Option<PgRow>) -> CoreResult<Option<Observation>> {
    let Some(row) = row else {
        return Ok(None);
    };
    let value = row.try_get::<Option<f64>, _>("value")?;
    let time = row.try_get::<DateTime<Utc>, _>("time")?;
    Ok(value.map(|value| Observation { time, value }))
}

/// View names are interpolated into SQL, so only plain lowercase identifiers pass.
fn checked_identifier(name: &str) -> CoreResult<&str> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(name)
    } else {
        Err(CoreError::validation(format!("invalid rollup view name: {name}")))
    }
}

#[async_trait]
impl MeasurementStore for PgMeasurementStore {
    async fn find_variable(&self, project: &str, name: &str) -> CoreResult<Option<i32>> {
        let row = sqlx::query(
            r#"
            SELECT id
            FROM measurements_meta
            WHERE project = $1 AND variable = $2
            "#,
        )
        .bind(project)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| row.try_get::<i32, _>("id"))
            .transpose()
            .map_err(CoreError::from)
    }

    async fn insert_variable(&self, project: &str, name: &str) -> CoreResult<VariableInsert> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO measurements_meta (project, variable)
            VALUES ($1, $2)
            ON CONFLICT (project, variable) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(project)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok(VariableInsert::Created(row.try_get::<i32, _>("id")?));
        }

        tracing::debug!(project, variable = name, "variable registered concurrently");
        match self.find_variable(project, name).await? {
            Some(id) => Ok(VariableInsert::Existing(id)),
            None => Err(CoreError::not_found(format!(
                "variable {name} vanished during registration for project {project}"
            ))),
        }
    }

    async fn count_variables(&self, project: &str) -> CoreResult<usize> {
        let count: i64 =
            sqlx::query_scalar("SELECT count(*) FROM measurements_meta WHERE project = $1")
                .bind(project)
                .fetch_one(&self.pool)
                .await?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    async fn existing_times(
        &self,
        variable_ids: &[i32],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CoreResult<Vec<(i32, DateTime<Utc>)>> {
        if variable_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            r#"
            SELECT variable, time
            FROM measurements
            WHERE time >= $1 AND time <= $2 AND variable = any($3)
            "#,
        )
        .bind(start)
        .bind(end)
        .bind(variable_ids)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> CoreResult<(i32, DateTime<Utc>)> {
                Ok((
                    row.try_get::<i32, _>("variable")?,
                    row.try_get::<DateTime<Utc>, _>("time")?,
                ))
            })
            .collect()
    }

    async fn insert_measurements(&self, rows: &[MeasurementRow]) -> CoreResult<u64> {
        let mut written = 0u64;
        for chunk in rows.chunks(INSERT_CHUNK_ROWS) {
            let mut builder: QueryBuilder<Postgres> =
                QueryBuilder::new("INSERT INTO measurements (time, variable, value, unit) ");
            builder.push_values(chunk.iter(), |mut b, row| {
                b.push_bind(row.time)
                    .push_bind(row.variable_id)
                    .push_bind(row.value)
                    .push_bind(&row.unit);
            });
            builder.push(" ON CONFLICT (variable, time) DO NOTHING");

            let inserted = builder.build().execute(&self.pool).await?.rows_affected();
            if (inserted as usize) < chunk.len() {
                tracing::debug!(
                    inserted,
                    skipped = chunk.len().saturating_sub(inserted as usize),
                    "skipped duplicate measurement rows"
                );
            }
            written += inserted;
        }
        Ok(written)
    }

    async fn last_measurement(&self, variable_id: i32) -> CoreResult<Option<Observation>> {
        let row = sqlx::query(
            r#"
            SELECT value, time
            FROM measurements
            WHERE variable = $1
            ORDER BY time DESC
            LIMIT 1
            "#,
        )
        .bind(variable_id)
        .fetch_optional(&self.pool)
        .await?;
        observation(row)
    }

    async fn last_measurement_before(
        &self,
        variable_id: i32,
        before: DateTime<Utc>,
        since: DateTime<Utc>,
    ) -> CoreResult<Option<Observation>> {
        let row = sqlx::query(
            r#"
            SELECT value, time
            FROM measurements
            WHERE variable = $1 AND time < $2 AND time > $3
            ORDER BY time DESC
            LIMIT 1
            "#,
        )
        .bind(variable_id)
        .bind(before)
        .bind(since)
        .fetch_optional(&self.pool)
        .await?;
        observation(row)
    }

    async fn last_rollup_before(
        &self,
        variable_id: i32,
        view: &str,
        aggregation: Aggregation,
        before: DateTime<Utc>,
    ) -> CoreResult<Option<Observation>> {
        let sql = format!(
            r#"
            SELECT "{column}"::double precision AS value, bucket AS time
            FROM {view}
            WHERE variable = $1 AND bucket <= $2
            ORDER BY bucket DESC
            LIMIT 1
            "#,
            column = aggregation.rollup_column(),
            view = checked_identifier(view)?,
        );
        let row = sqlx::query(&sql)
            .bind(variable_id)
            .bind(before)
            .fetch_optional(&self.pool)
            .await?;
        observation(row)
    }

    async fn bucketed_series(
        &self,
        query: &SeriesQuery,
    ) -> CoreResult<Vec<(DateTime<Utc>, Option<f64>)>> {
        let rows = match &query.source {
            SeriesSource::Rollup(view) => {
                let sql = format!(
                    r#"
                    SELECT bucket, "{column}"::double precision AS value
                    FROM {view}
                    WHERE variable = $1 AND bucket >= $2 AND bucket <= $3
                    ORDER BY bucket
                    "#,
                    column = query.aggregation.rollup_column(),
                    view = checked_identifier(view)?,
                );
                sqlx::query(&sql)
                    .bind(query.variable_id)
                    .bind(query.start)
                    .bind(query.end)
                    .fetch_all(&self.pool)
                    .await?
            }
            SeriesSource::Raw => {
                // sub-day buckets share the grid anchored at the zone's standard offset;
                // calendar buckets follow local midnight
                let fixed = matches!(query.interval.step(), Step::Seconds(_));
                let bucket = if fixed {
                    "time_bucket($1::interval, time, $5::timestamptz)"
                } else {
                    "time_bucket($1::interval, time, $5::text)"
                };
                let sql = format!(
                    r#"
                    SELECT {bucket} AS bucket, ({expr})::double precision AS value
                    FROM measurements
                    WHERE variable = $2 AND time >= $3 AND time <= $4
                    GROUP BY bucket
                    ORDER BY bucket
                    "#,
                    expr = query.aggregation.sql_expression(),
                );
                let raw = sqlx::query(&sql)
                    .bind(query.interval.pg_interval())
                    .bind(query.variable_id)
                    .bind(query.start)
                    .bind(query.end);
                let raw = if fixed {
                    raw.bind(fixed_origin(query.timezone, query.start))
                } else {
                    raw.bind(query.timezone.name())
                };
                raw.fetch_all(&self.pool).await?
            }
        };

        rows.into_iter()
            .map(|row| -> CoreResult<(DateTime<Utc>, Option<f64>)> {
                Ok((
                    row.try_get::<DateTime<Utc>, _>("bucket")?,
                    row.try_get::<Option<f64>, _>("value")?,
                ))
            })
            .collect()
    }
}
