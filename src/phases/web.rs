use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::ports::TLS_WEB_PORTS;
use crate::probe::{HttpRequest, HttpResponse, WebClient};
use crate::stealth::StealthPolicy;
use crate::types::{
    DirectoryFinding, PhaseResult, PortFinding, Severity, Technologies, Vulnerability, WebFinding,
    WebOutput,
};

static TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("title pattern is valid"));

/// Used when no wordlist is configured or the configured one cannot be read.
const BUILTIN_WORDLIST: &[&str] = &[
    "admin",
    "administrator",
    "login",
    "wp-admin",
    "wp-login.php",
    "dashboard",
    "api",
    "backup",
    "backups",
    "config",
    "uploads",
    "images",
    "js",
    "css",
    "static",
    "assets",
    "test",
    "dev",
    "old",
    "tmp",
    "phpmyadmin",
    "server-status",
    "cgi-bin",
    "includes",
    ".git",
    ".svn",
    "console",
    "manager",
    "portal",
    "private",
];

/// Status codes that mean a brute-forced path exists.
const FOUND_STATUSES: [u16; 5] = [200, 301, 302, 401, 403];

const SENSITIVE_FILES: [(&str, Severity); 7] = [
    (".env", Severity::High),
    ("web.config", Severity::High),
    ("phpinfo.php", Severity::High),
    (".htaccess", Severity::Medium),
    ("robots.txt", Severity::Low),
    ("sitemap.xml", Severity::Low),
    ("crossdomain.xml", Severity::Low),
];

#[derive(Debug, Clone)]
pub struct WebSettings {
    pub http_timeout: Duration,
    pub wordlist: Arc<[String]>,
    pub max_directory_words: usize,
}

/// Directory wordlist from `path`, one entry per line; blank lines and `#`
/// comments are ignored. Falls back to the built-in list with a warning.
pub fn load_wordlist(path: Option<&Path>) -> Arc<[String]> {
    let builtin = || -> Arc<[String]> { BUILTIN_WORDLIST.iter().map(|w| w.to_string()).collect() };
    let Some(path) = path else {
        return builtin();
    };
    match fs::read_to_string(path) {
        Ok(content) => {
            let words: Vec<String> = content
                .lines()
                .map(|l| l.trim().trim_start_matches('/'))
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(str::to_string)
                .collect();
            if words.is_empty() {
                warn!("wordlist {} is empty, using built-in list", path.display());
                return builtin();
            }
            words.into()
        }
        Err(e) => {
            warn!("cannot read wordlist {}: {e}; using built-in list", path.display());
            builtin()
        }
    }
}

/// Base URL for a web port: `https` on 443/8443, `http` elsewhere.
pub fn base_url(finding: &PortFinding) -> String {
    let scheme = if TLS_WEB_PORTS.contains(&finding.port) {
        "https"
    } else {
        "http"
    };
    format!("{scheme}://{}", finding.host.url_authority(finding.port))
}

pub fn extract_title(body: &str) -> Option<String> {
    let raw = TITLE.captures(body)?.get(1)?.as_str();
    let title = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    (!title.is_empty()).then_some(title)
}

/// Fingerprint server software, frameworks, CMS and client libraries from a
/// response's headers and body.
pub fn detect_technologies(resp: &HttpResponse) -> Technologies {
    let mut tech = Technologies {
        server: resp.header("server").map(str::to_string),
        ..Technologies::default()
    };
    let body = resp.body.to_ascii_lowercase();
    let powered_by = resp.header("x-powered-by").unwrap_or("").to_ascii_lowercase();
    let cookies = resp.header("set-cookie").unwrap_or("").to_ascii_lowercase();

    let add = |set: &mut BTreeSet<String>, name: &str, hit: bool| {
        if hit {
            set.insert(name.to_string());
        }
    };

    add(
        &mut tech.frameworks,
        "Django",
        body.contains("csrfmiddlewaretoken") || cookies.contains("csrftoken"),
    );
    add(
        &mut tech.frameworks,
        "Flask",
        powered_by.contains("flask") || resp.header("server").is_some_and(|s| s.contains("Werkzeug")),
    );
    add(
        &mut tech.frameworks,
        "Laravel",
        cookies.contains("laravel_session") || body.contains("laravel"),
    );
    add(&mut tech.frameworks, "Express.js", powered_by.contains("express"));

    add(
        &mut tech.cms,
        "WordPress",
        body.contains("wp-content") || body.contains("wp-includes"),
    );
    add(
        &mut tech.cms,
        "Joomla",
        body.contains("/media/jui/") || body.contains("joomla"),
    );
    add(
        &mut tech.cms,
        "Drupal",
        body.contains("drupal") || resp.header("x-generator").is_some_and(|g| g.contains("Drupal")),
    );

    add(&mut tech.client_libs, "jQuery", body.contains("jquery"));
    add(
        &mut tech.client_libs,
        "Angular",
        body.contains("ng-app") || body.contains("angular"),
    );
    add(
        &mut tech.client_libs,
        "React",
        body.contains("data-reactroot") || body.contains("react"),
    );
    add(
        &mut tech.client_libs,
        "Vue.js",
        body.contains("vue.js") || body.contains("data-v-"),
    );

    tech
}

fn request(url: String, settings: &WebSettings, policy: &StealthPolicy) -> HttpRequest {
    HttpRequest::get(url, settings.http_timeout).header("User-Agent", policy.user_agent())
}

/// Fetch each web service, fingerprint it, brute-force directories and check
/// for sensitive files. Fails only when no web service answered.
pub async fn run(
    web: Arc<dyn WebClient>,
    web_ports: &[PortFinding],
    policy: &StealthPolicy,
    settings: &WebSettings,
) -> PhaseResult<WebOutput> {
    let mut out = WebOutput::default();

    for finding in web_ports {
        let url = base_url(finding);
        policy.pause().await;
        let resp = match web.get(&request(format!("{url}/"), settings, policy)).await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(%url, error = %e, "web probe failed");
                out.errors.push(format!("{url}: {e}"));
                continue;
            }
        };
        info!("web service at {url} answered {}", resp.status);

        let technologies = detect_technologies(&resp);
        if !technologies.is_empty() {
            out.technologies.insert(url.clone(), technologies.clone());
        }
        out.web_services.push(WebFinding {
            url: url.clone(),
            status_code: resp.status,
            title: extract_title(&resp.body),
            server: resp.header("server").map(str::to_string),
            content_length: content_length(&resp),
            headers: resp.headers.clone(),
            technologies,
        });

        out.directories
            .extend(brute_force_directories(Arc::clone(&web), &url, policy, settings).await);
        out.vulnerabilities
            .extend(check_sensitive_files(web.as_ref(), &url, policy, settings).await);
    }

    if out.web_services.is_empty() && !out.errors.is_empty() {
        return PhaseResult::failed(out.errors.join("; "));
    }
    PhaseResult::Ok(out)
}

fn content_length(resp: &HttpResponse) -> u64 {
    resp.header("content-length")
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(resp.body.len() as u64)
}

async fn brute_force_directories(
    web: Arc<dyn WebClient>,
    base: &str,
    policy: &StealthPolicy,
    settings: &WebSettings,
) -> Vec<DirectoryFinding> {
    let sem = Arc::new(Semaphore::new(policy.concurrency_cap()));
    let mut set = JoinSet::new();

    for word in settings.wordlist.iter().take(settings.max_directory_words) {
        policy.pause().await;
        let Ok(permit) = sem.clone().acquire_owned().await else {
            break;
        };
        let req = request(format!("{base}/{word}"), settings, policy).no_redirects();
        let web = Arc::clone(&web);
        set.spawn(async move {
            let _permit = permit;
            match web.get(&req).await {
                Ok(resp) if FOUND_STATUSES.contains(&resp.status) => Some(DirectoryFinding {
                    content_length: content_length(&resp),
                    url: req.url,
                    status_code: resp.status,
                }),
                Ok(_) => None,
                Err(e) => {
                    debug!(url = %req.url, error = %e, "directory probe failed");
                    None
                }
            }
        });
    }

    let mut found = Vec::new();
    while let Some(res) = set.join_next().await {
        if let Ok(Some(dir)) = res {
            found.push(dir);
        }
    }
    found.sort_by(|a, b| a.url.cmp(&b.url));
    found
}

async fn check_sensitive_files(
    web: &dyn WebClient,
    base: &str,
    policy: &StealthPolicy,
    settings: &WebSettings,
) -> Vec<Vulnerability> {
    let mut found = Vec::new();
    for (file, severity) in SENSITIVE_FILES {
        policy.pause().await;
        let url = format!("{base}/{file}");
        match web.get(&request(url.clone(), settings, policy).no_redirects()).await {
            Ok(resp) if resp.status == 200 => {
                warn!("sensitive file exposed: {url}");
                found.push(Vulnerability {
                    kind: "Information Disclosure".into(),
                    severity,
                    url_or_host: url,
                    description: format!("Sensitive file {file} is publicly accessible"),
                    recommendation: format!("Remove {file} from the web root or deny access to it"),
                });
            }
            Ok(_) => {}
            Err(e) => debug!(%url, error = %e, "sensitive file check failed"),
        }
    }
    found
}
