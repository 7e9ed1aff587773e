/// Running migrations twice is a no-op and status reports the registry tables.
///
/// DB-backed test. Skips if MPG_DATABASE_URL is not set.
#[tokio::test]
async fn migrate_twice_then_status() -> anyhow::Result<()> {
    if std::env::var(mpg_db::ENV_DB_URL).is_err() {
        eprintln!("SKIP: MPG_DATABASE_URL not set");
        return Ok(());
    }

    let pool = mpg_db::connect_from_env().await?;
    mpg_db::migrate(&pool).await?;
    mpg_db::migrate(&pool).await?;

    let st = mpg_db::status(&pool).await?;
    assert!(st.ok);
    assert!(st.has_registry_tables);
    Ok(())
}
