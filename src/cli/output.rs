use serde_json::Value;

pub fn print_status(response: &str) {
    println!("       mpgpu Daemon Status      ");

    if response.is_empty() {
        println!("No response from daemon\n");
        return;
    }

    let status: Value = match serde_json::from_str(response) {
        Ok(v) => v,
        Err(_) => {
            println!("{}\n", response);
            return;
        }
    };

    println!("Daemon: Running\n");
    for line in status_lines(&status) {
        println!("    {}", line);
    }
    println!();
}

fn status_lines(status: &Value) -> Vec<String> {
    let ctl = &status["controller"];
    let scaling = &ctl["scaling"];
    let stats = &ctl["stats"];

    vec![
        format!("Profile:  {}", ctl["profile"].as_str().unwrap_or("?")),
        format!(
            "Mode:     {}",
            scaling["mode"].as_str().unwrap_or("?")
        ),
        format!(
            "Powered:  {}  (domains {:#x})",
            ctl["powered"],
            status["domain_stat"].as_u64().unwrap_or(0)
        ),
        format!(
            "Step:     {} -> {} MHz  (applied {})",
            scaling["current_step"], scaling["freq_mhz"], scaling["last_applied_step"]
        ),
        format!(
            "Bounds:   {}..={}  (turbo {}, limit {}, cooling level {})",
            scaling["min_step"],
            scaling["max_step"],
            scaling["turbo_step"],
            scaling["limit_step"],
            scaling["cooling_level"]
        ),
        format!(
            "Cores:    {}/{}  (min {})",
            scaling["cores_enabled"], scaling["cores_total"], scaling["min_cores"]
        ),
        format!(
            "Applies:  {} run, {} coalesced, {} failed{}",
            stats["runs"],
            stats["coalesced"],
            stats["failures"],
            if ctl["pending"].as_bool().unwrap_or(false) { ", pending" } else { "" }
        ),
        format!("Log:      {}", status["log_level"].as_str().unwrap_or("?")),
    ]
}

pub fn print_daemon_stopped() {
    println!("       mpgpu Daemon Status      ");
    println!(" Daemon: Not running\n");
}

/// Replies starting with ERR go to stderr
pub fn print_reply(action: &str, resp: &str) {
    if let Some(err) = resp.strip_prefix("ERR ") {
        print_error(err);
    } else {
        print_success(&format!("{}: {}", action, resp));
    }
}

pub fn print_success(message: &str) {
    println!(" {}", message);
}

pub fn print_error(message: &str) {
    eprintln!(" Error: {}", message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_lines() {
        let status = serde_json::json!({
            "controller": {
                "profile": "m8b",
                "powered": true,
                "pending": false,
                "scaling": {
                    "mode": "freq_core", "current_step": 2, "last_applied_step": 2,
                    "cores_enabled": 4, "cores_total": 8, "stay_count": 0,
                    "min_step": 0, "max_step": 3, "turbo_step": 4,
                    "min_cores": 1, "cooling_level": 1, "limit_step": 2,
                    "freq_mhz": 400
                },
                "stats": { "runs": 5, "coalesced": 2, "failures": 0 }
            },
            "domain_stat": 0,
            "log_level": "INFO"
        });
        let lines = status_lines(&status);
        assert_eq!(lines[0], "Profile:  m8b");
        assert_eq!(lines[3], "Step:     2 -> 400 MHz  (applied 2)");
        assert_eq!(lines[4], "Bounds:   0..=3  (turbo 4, limit 2, cooling level 1)");
        assert_eq!(lines[5], "Cores:    4/8  (min 1)");
        assert_eq!(lines[6], "Applies:  5 run, 2 coalesced, 0 failed");
    }
}
