use std::{env, env::VarError};

/// There's no real CLI for the server, so just do quick 'n dirty
pub fn handle_command_line_args() -> bool {
    let has_cli_args = env::args().count() > 1;
    if has_cli_args {
        // We don't expect any CLI args, so always print the help
        display_readme();
        display_envs();
    }
    has_cli_args
}

fn display_readme() {
    const README: &str = include_str!("./cli-help.txt");
    println!("\n{README}\n");
}

fn display_envs() {
    // Be explicit about which envars to print, so as to avoid accidentally exposing secrets
    const DISPLAY_ENVS: [&str; 20] = [
        "RUST_LOG",
        "SALON_HOST",
        "SALON_PORT",
        "SALON_DATABASE_URL",
        "SALON_USE_X_FORWARDED_FOR",
        "SALON_USE_FORWARDED",
        "SALON_WEBHOOK_HMAC_CHECKS",
        "SALON_WEBHOOK_IP_WHITELIST",
        "SALON_IDENTITY_CHECKS",
        "SALON_GATEWAY_URL",
        "SALON_GATEWAY_TIMEOUT_SECS",
        "SALON_SLOT_MINUTES",
        "SALON_UTC_OFFSET_MINUTES",
        "SALON_AUTO_CONFIRM_ON_DEPOSIT",
        "SALON_POINT_EARN_RATE_BPS",
        "SALON_FULL_REFUND_HOURS",
        "SALON_LATE_CANCEL_FEE_TIERS",
        "SALON_SHOP_COMPENSATION_POINTS",
        "SALON_RECONCILE_INTERVAL_SECS",
        "SALON_RECONCILE_AFTER_MINS",
    ];

    println!("Current environment values (EXCLUDING variables that contain secrets):");
    DISPLAY_ENVS.iter().for_each(|&name| {
        let val = match env::var(name) {
            Ok(s) => s,
            Err(VarError::NotPresent) => "Not set".into(),
            Err(VarError::NotUnicode(s)) => format!("Invalid value: {}", s.to_string_lossy()),
        };
        println!("  {name:<35} {val:<15}");
    })
}
