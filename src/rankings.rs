use crate::error::PipelineError;
use chrono::NaiveDate;
use sqlx::SqlitePool;

/// One row of the ranking table consumed by the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Ranking {
    pub operator_name: String,
    pub average_ppm: f64,
}

/// Average punctuality per operator over the lookback window ending at
/// `as_of`, best first. Read-only; stale ingestion simply shows up as
/// stale averages here rather than as an error.
pub async fn window_rankings(
    pool: &SqlitePool,
    as_of: NaiveDate,
    window_days: u32,
) -> Result<Vec<Ranking>, PipelineError> {
    let rows: Vec<(String, f64)> = sqlx::query_as(
        "SELECT operator.name, ROUND(AVG(performance.ppm), 2) AS average_ppm
         FROM performance
         JOIN operator ON performance.operator_id = operator.id
         WHERE date(performance.record_date) > date(?, '-' || ? || ' days')
           AND date(performance.record_date) <= date(?)
         GROUP BY operator.name
         ORDER BY average_ppm DESC",
    )
    .bind(as_of.to_string())
    .bind(i64::from(window_days))
    .bind(as_of.to_string())
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(operator_name, average_ppm)| Ranking {
            operator_name,
            average_ppm,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    async fn seed(pool: &SqlitePool, name: &str, rows: &[(&str, f64)]) {
        let id: i64 = sqlx::query_scalar("INSERT INTO operator (name) VALUES (?) RETURNING id")
            .bind(name)
            .fetch_one(pool)
            .await
            .expect("operator");
        for (date, ppm) in rows {
            sqlx::query(
                "INSERT INTO performance (operator_id, ppm, record_date, record_time) VALUES (?, ?, ?, '12:00:00')",
            )
            .bind(id)
            .bind(ppm)
            .bind(date)
            .execute(pool)
            .await
            .expect("row");
        }
    }

    #[tokio::test]
    async fn averages_only_rows_inside_the_window_best_first() {
        let pool = test_pool().await;
        seed(
            &pool,
            "LNER",
            &[
                ("2024-03-10", 90.0),
                ("2024-03-12", 94.0),
                // outside a 7-day window ending 2024-03-14
                ("2024-03-01", 10.0),
            ],
        )
        .await;
        seed(&pool, "GWR", &[("2024-03-11", 96.0)]).await;
        seed(&pool, "Old", &[("2024-02-01", 99.0)]).await;

        let as_of = NaiveDate::from_ymd_opt(2024, 3, 14).unwrap();
        let rankings = window_rankings(&pool, as_of, 7).await.expect("rankings");

        assert_eq!(
            rankings,
            vec![
                Ranking {
                    operator_name: "GWR".to_string(),
                    average_ppm: 96.0
                },
                Ranking {
                    operator_name: "LNER".to_string(),
                    average_ppm: 92.0
                },
            ]
        );
    }

    #[tokio::test]
    async fn averages_are_rounded_to_two_places() {
        let pool = test_pool().await;
        seed(
            &pool,
            "XC",
            &[("2024-03-12", 90.0), ("2024-03-13", 90.5), ("2024-03-14", 90.5)],
        )
        .await;

        let as_of = NaiveDate::from_ymd_opt(2024, 3, 14).unwrap();
        let rankings = window_rankings(&pool, as_of, 7).await.expect("rankings");
        assert!((rankings[0].average_ppm - 90.33).abs() < 1e-9);
    }

    #[tokio::test]
    async fn empty_store_ranks_nobody() {
        let pool = test_pool().await;
        let as_of = NaiveDate::from_ymd_opt(2024, 3, 14).unwrap();
        assert!(window_rankings(&pool, as_of, 7)
            .await
            .expect("rankings")
            .is_empty());
    }
}
