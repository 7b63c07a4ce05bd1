use sqlx::Row;

fn database_url() -> Option<String> {
    dotenvy::dotenv().ok();
    std::env::var("DATABASE_URL").ok().filter(|url| !url.trim().is_empty())
}

#[tokio::test]
async fn migrations_apply_and_lifecycle_schema_exists() -> anyhow::Result<()> {
    let Some(database_url) = database_url() else {
        eprintln!("DATABASE_URL is not set; skipping migrations smoke test");
        return Ok(());
    };

    let pool =
        sqlx::postgres::PgPoolOptions::new().max_connections(1).connect(&database_url).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    for table in ["exam_states", "exams", "executions", "question_executions", "lifecycle_jobs"] {
        let row = sqlx::query("SELECT to_regclass($1)::text").bind(table).fetch_one(&pool).await?;
        let regclass: Option<String> = row.try_get(0)?;
        assert!(regclass.is_some(), "expected table {table} to exist after migrations");
    }

    let index = sqlx::query("SELECT to_regclass('ux_executions_one_open_per_user')::text")
        .fetch_one(&pool)
        .await?;
    let index: Option<String> = index.try_get(0)?;
    assert!(index.is_some(), "expected the open-execution unique index");

    let states: Vec<(i32, String)> =
        sqlx::query_as("SELECT id, name FROM exam_states ORDER BY id").fetch_all(&pool).await?;
    for expected in [(1, "active"), (2, "inactive"), (3, "finished")] {
        assert!(
            states.iter().any(|(id, name)| *id == expected.0 && name == expected.1),
            "missing exam state {expected:?}"
        );
    }

    Ok(())
}
