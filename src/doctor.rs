//! Health checks across configuration, engine reachability, schedules,
//! images and the web-auth surface, reported as text or JSON.

use crate::config::file::{FileSource, LoadMode, LoadedConfig};
use crate::config::model::{JobSpec, PullPolicy};
use crate::core::schedule::ScheduleExpr;
use crate::provider::ContainerProvider;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    Warn,
    Fail,
}

#[derive(Debug, Serialize)]
pub struct Check {
    pub name: &'static str,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub struct DoctorReport {
    pub checks: Vec<Check>,
    pub healthy: bool,
}

impl DoctorReport {
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for check in &self.checks {
            let marker = match check.status {
                CheckStatus::Ok => "ok  ",
                CheckStatus::Warn => "warn",
                CheckStatus::Fail => "FAIL",
            };
            out.push_str(&format!("[{marker}] {:<14} {}\n", check.name, check.detail));
        }
        out.push_str(if self.healthy { "healthy\n" } else { "unhealthy\n" });
        out
    }

    pub fn render_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

pub async fn run(config_pattern: &str, provider: Option<&dyn ContainerProvider>) -> DoctorReport {
    let mut checks = Vec::new();

    let source = FileSource::new(config_pattern);
    let loaded = match source.load(LoadMode::Validate) {
        Ok(loaded) => {
            let status = if loaded.job_errors.is_empty() {
                if loaded.warnings.is_empty() { CheckStatus::Ok } else { CheckStatus::Warn }
            } else {
                CheckStatus::Fail
            };
            let mut detail = format!(
                "{} job(s), {} webhook(s) from {} file(s)",
                loaded.jobs.len(),
                loaded.webhooks.len(),
                loaded.files.len()
            );
            for err in &loaded.job_errors {
                detail.push_str(&format!("; {err}"));
            }
            for warning in &loaded.warnings {
                detail.push_str(&format!("; {warning}"));
            }
            checks.push(Check { name: "configuration", status, detail });
            Some(loaded)
        }
        Err(err) => {
            checks.push(Check {
                name: "configuration",
                status: CheckStatus::Fail,
                detail: err.to_string(),
            });
            None
        }
    };

    let engine_ok = match provider {
        Some(provider) => match provider.ping().await {
            Ok(()) => {
                checks.push(Check {
                    name: "engine",
                    status: CheckStatus::Ok,
                    detail: "container engine answered ping".to_string(),
                });
                true
            }
            Err(err) => {
                checks.push(Check {
                    name: "engine",
                    status: CheckStatus::Fail,
                    detail: err.to_string(),
                });
                false
            }
        },
        None => {
            checks.push(Check {
                name: "engine",
                status: CheckStatus::Fail,
                detail: "could not connect to the container engine".to_string(),
            });
            false
        }
    };

    if let Some(loaded) = &loaded {
        checks.push(schedules_check(loaded));
        checks.push(images_check(loaded, provider.filter(|_| engine_ok)).await);
        checks.push(web_auth_check(loaded));
    }

    let healthy = checks.iter().all(|c| c.status != CheckStatus::Fail);
    DoctorReport { checks, healthy }
}

fn schedules_check(loaded: &LoadedConfig) -> Check {
    let mut bad = Vec::new();
    let mut parsed = 0usize;
    for (key, job) in &loaded.jobs {
        let Some(text) = job.common().schedule.as_deref() else {
            continue;
        };
        match text.parse::<ScheduleExpr>() {
            Ok(_) => parsed += 1,
            Err(err) => bad.push(format!("{key}: {err}")),
        }
    }
    if bad.is_empty() {
        Check {
            name: "schedules",
            status: CheckStatus::Ok,
            detail: format!("{parsed} schedule(s) parse"),
        }
    } else {
        Check { name: "schedules", status: CheckStatus::Fail, detail: bad.join("; ") }
    }
}

async fn images_check(loaded: &LoadedConfig, provider: Option<&dyn ContainerProvider>) -> Check {
    let mut images = Vec::new();
    for job in loaded.jobs.values() {
        match job {
            JobSpec::Run(run) => {
                if let Some(image) = &run.image {
                    images.push((image.clone(), run.pull));
                }
            }
            JobSpec::ServiceRun(service) => {
                if let Some(image) = &service.image {
                    images.push((image.clone(), service.pull));
                }
            }
            _ => {}
        }
    }
    if images.is_empty() {
        return Check {
            name: "images",
            status: CheckStatus::Ok,
            detail: "no image-based jobs".to_string(),
        };
    }
    let Some(provider) = provider else {
        return Check {
            name: "images",
            status: CheckStatus::Warn,
            detail: "engine unreachable, image presence not checked".to_string(),
        };
    };

    let mut missing = Vec::new();
    for (image, pull) in &images {
        match provider.image_present(image).await {
            Ok(true) => {}
            Ok(false) => {
                if *pull == PullPolicy::Never {
                    missing.push(format!("{image} (pull=never)"));
                } else {
                    missing.push(format!("{image} (will pull on first run)"));
                }
            }
            Err(err) => missing.push(format!("{image}: {err}")),
        }
    }
    if missing.is_empty() {
        Check {
            name: "images",
            status: CheckStatus::Ok,
            detail: format!("{} image(s) present", images.len()),
        }
    } else {
        Check { name: "images", status: CheckStatus::Warn, detail: missing.join("; ") }
    }
}

fn web_auth_check(loaded: &LoadedConfig) -> Check {
    let web = &loaded.global.web;
    if web.enable_web && (web.auth_user.is_none() || web.auth_password.is_none()) {
        Check {
            name: "web-auth",
            status: CheckStatus::Warn,
            detail: "web surface enabled without auth credentials".to_string(),
        }
    } else {
        Check {
            name: "web-auth",
            status: CheckStatus::Ok,
            detail: if web.enable_web {
                "web surface enabled with auth".to_string()
            } else {
                "web surface disabled".to_string()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::fake::FakeProvider;
    use std::io::Write;

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> String {
        let path = dir.path().join("config.ini");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path.display().to_string()
    }

    #[tokio::test]
    async fn healthy_report_for_valid_config() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = write_config(
            &dir,
            "[job-local \"ok\"]\nschedule = @daily\ncommand = true\n",
        );
        let provider = FakeProvider::new();
        let report = run(&pattern, Some(&provider)).await;
        assert!(report.healthy, "{}", report.render_text());
        assert!(report.checks.iter().any(|c| c.name == "schedules" && c.status == CheckStatus::Ok));
    }

    #[tokio::test]
    async fn unreachable_engine_fails_but_renders() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = write_config(
            &dir,
            "[job-local \"ok\"]\nschedule = @daily\ncommand = true\n",
        );
        let provider = FakeProvider::new();
        provider.set_ping_ok(false);
        let report = run(&pattern, Some(&provider)).await;
        assert!(!report.healthy);
        let json: serde_json::Value = serde_json::from_str(&report.render_json()).unwrap();
        assert_eq!(json["healthy"], false);
    }

    #[tokio::test]
    async fn missing_image_with_pull_never_warns() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = write_config(
            &dir,
            "[job-run \"r\"]\nschedule = @daily\nimage = ghost:1\npull = never\n",
        );
        let provider = FakeProvider::new();
        provider.mark_image_missing("ghost:1");
        let report = run(&pattern, Some(&provider)).await;
        let images = report.checks.iter().find(|c| c.name == "images").unwrap();
        assert_eq!(images.status, CheckStatus::Warn);
        assert!(images.detail.contains("pull=never"));
    }
}
