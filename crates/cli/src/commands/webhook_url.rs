use parley_slack::inbound::WEBHOOK_PATH;
use url::Url;

use super::CommandResult;

const COMMAND: &str = "webhook-url";

pub fn run(base_url: &str, allow_http: bool) -> CommandResult {
    match webhook_url(base_url, allow_http) {
        Ok(url) => CommandResult::success(COMMAND, url),
        Err(message) => CommandResult::failure(COMMAND, "invalid_url", message, 1),
    }
}

fn webhook_url(base_url: &str, allow_http: bool) -> Result<String, String> {
    let parsed = Url::parse(base_url.trim())
        .map_err(|error| format!("`{base_url}` is not a valid URL: {error}"))?;

    match parsed.scheme() {
        "https" => {}
        "http" if allow_http => {}
        "http" => {
            return Err(
                "Slack requires an https request URL; pass --allow-http for local tunnels".to_string()
            )
        }
        other => return Err(format!("unsupported scheme `{other}`, expected https")),
    }

    if parsed.host_str().is_none() {
        return Err(format!("`{base_url}` has no host"));
    }
    if parsed.query().is_some() || parsed.fragment().is_some() {
        return Err("base URL must not carry a query string or fragment".to_string());
    }

    let base = parsed.as_str().trim_end_matches('/');
    Ok(format!("{base}{WEBHOOK_PATH}"))
}
