mod cache_tool;
mod cmd;

#[macro_use]
extern crate log;

use cache_tool::CacheTool;
use clap::Parser;
use cmd::Cli;

fn main() {
    let cli = Cli::parse();

    let log_config = mnt_util::LogConfig::new(mnt_util::MNT_CACHE_CLI_TOOL_NAME)
        .with_level(&cli.log_level)
        .enable_file(false)
        .enable_console(true);

    let _logger = match mnt_util::init_log(log_config) {
        Ok(handle) => handle,
        Err(e) => {
            println!("Failed to init log: {}", e);
            std::process::exit(1);
        }
    };

    // The wallet and this tool must not work on the same cache at once
    let _process_lock = match mnt_util::init_process_lock(mnt_util::MNT_WALLET_SERVICE_NAME) {
        Ok(lock) => lock,
        Err(e) => {
            println!("{}", e);
            std::process::exit(1);
        }
    };

    let root_dir = cli
        .root
        .clone()
        .unwrap_or_else(|| mnt_util::get_service_dir(mnt_util::MNT_WALLET_SERVICE_NAME));

    let tool = match CacheTool::new(&root_dir) {
        Ok(tool) => tool,
        Err(e) => {
            println!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = tool.process_command(cli) {
        let msg = format!("Error processing command: {}", e);
        println!("{}", msg);
        std::process::exit(1);
    }
}
