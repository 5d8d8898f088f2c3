use sea_orm_migration::prelude::*;
use std::env;
use std::process::ExitCode;

use migration::Migrator;

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let Ok(db_url) = env::var("DATABASE_URL") else {
        log::error!("DATABASE_URL must be set");
        return ExitCode::FAILURE;
    };
    let command = env::args().nth(1).unwrap_or_else(|| "up".to_string());

    match run(&db_url, &command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{} failed: {}", command, e);
            ExitCode::FAILURE
        }
    }
}

async fn run(db_url: &str, command: &str) -> Result<(), DbErr> {
    let db = sea_orm::Database::connect(db_url).await?;

    match command {
        "up" => {
            Migrator::up(&db, None).await?;
            log::info!("migrations applied");
        }
        "down" => {
            Migrator::down(&db, None).await?;
            log::info!("migration rolled back");
        }
        "fresh" => {
            Migrator::fresh(&db).await?;
            log::info!("fresh migrations applied");
        }
        "status" => Migrator::status(&db).await?,
        other => {
            return Err(DbErr::Custom(format!(
                "unknown command {other}; use up, down, fresh or status"
            )));
        }
    }
    Ok(())
}
