//! Server command implementation

use std::path::Path;

use anyhow::Result;
use tally_server::ServerConfig;

use super::open_db;

pub async fn cmd_serve(
    db_path: &Path,
    host: &str,
    port: u16,
    no_auth: bool,
    dev: bool,
    upload_dir: Option<&Path>,
    no_encrypt: bool,
) -> Result<()> {
    let config = server_config(no_auth, dev, upload_dir);

    println!("🚀 Starting Tally web server...");
    println!("   Database: {}", db_path.display());
    println!("   Listening: http://{}:{}", host, port);
    println!("   Uploads: {}", config.upload_dir.display());

    if no_auth {
        println!();
        println!("   ⚠️  Authentication DISABLED - do not expose to network!");
        println!("      Requests without {} act as {}", config.auth_header, config.dev_user);
    } else {
        println!("   🔒 Authentication: {} header", config.auth_header);
    }
    if config.dev_mode {
        println!("   🛠️  Dev mode: permissive CORS");
    } else if !config.allowed_origins.is_empty() {
        println!("   🌐 CORS origins: {}", config.allowed_origins.join(", "));
    }
    println!();

    let db = open_db(db_path, no_encrypt)?;
    tally_server::serve_with_config(db, host, port, config).await
}

/// Environment config with command-line overrides applied
pub fn server_config(no_auth: bool, dev: bool, upload_dir: Option<&Path>) -> ServerConfig {
    let mut config = ServerConfig::from_env();
    config.require_auth = !no_auth;
    config.dev_mode = config.dev_mode || dev;
    if let Some(dir) = upload_dir {
        config.upload_dir = dir.to_path_buf();
    }
    config
}
