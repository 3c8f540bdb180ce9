//! 开发用令牌签发工具：使用网关配置的密钥签发访问/刷新令牌
//!
//! gateway_token --user-id 42 --roles CUSTOMER,PREMIUM --session s-1 --mfa [--refresh]

use anyhow::{bail, Context, Result};
use funbank_gateway::{
    config::Config,
    infrastructure::jwt::{JwtService, UserAuthentication},
};

#[derive(Debug, Default)]
struct Args {
    user: UserAuthentication,
    refresh: bool,
}

fn split_list(v: &str) -> Vec<String> {
    v.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_args() -> Result<Args> {
    let mut parsed = Args::default();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        let mut value = || args.next().with_context(|| format!("{arg} requires a value"));
        match arg.as_str() {
            "--user-id" => parsed.user.user_id = value()?,
            "--username" => parsed.user.username = Some(value()?),
            "--email" => parsed.user.email = Some(value()?),
            "--roles" => parsed.user.roles = split_list(&value()?),
            "--permissions" => parsed.user.permissions = split_list(&value()?),
            "--session" => parsed.user.session_id = Some(value()?),
            "--mfa" => parsed.user.mfa_verified = true,
            "--refresh" => parsed.refresh = true,
            other => bail!("unknown argument: {other}"),
        }
    }

    if parsed.user.user_id.trim().is_empty() {
        bail!("--user-id is required");
    }
    Ok(parsed)
}

fn main() -> Result<()> {
    let args = parse_args()?;
    let config = Config::load()?;
    let jwt = JwtService::from_config(&config.jwt)?;

    let token = if args.refresh {
        jwt.generate_refresh_token(&args.user)?
    } else {
        jwt.generate_access_token(&args.user)?
    };
    println!("{token}");
    Ok(())
}
