//! Feed Source Catalog
//!
//! Ordered list of advisory feeds consumed by the ingestor. The built-in
//! catalog covers government CERTs, vendor blogs and high-frequency cyber
//! news; it can be replaced wholesale with a JSON file via
//! `THREATWATCH_SOURCES`.

use serde::{Deserialize, Serialize};

use crate::constants;

/// One advisory feed endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSource {
    pub name: String,
    pub url: String,
    pub category: String,
}

struct BuiltinSource {
    name: &'static str,
    url: &'static str,
    category: &'static str,
}

const BUILTIN_SOURCES: &[BuiltinSource] = &[
    // ----- Government / national -----
    BuiltinSource {
        name: "CERT-IN",
        url: "https://www.cert-in.org.in/RSS_Feed.xml",
        category: "Government Advisory",
    },
    BuiltinSource {
        name: "CISA Advisories",
        url: "https://www.cisa.gov/cybersecurity-advisories/all.xml",
        category: "Government Advisory",
    },
    BuiltinSource {
        name: "NCSC UK",
        url: "https://www.ncsc.gov.uk/api/1/services/v1/all-rss-feed.xml",
        category: "Government Advisory",
    },
    // ----- High-frequency cyber news -----
    BuiltinSource {
        name: "The Hacker News",
        url: "https://feeds.feedburner.com/TheHackersNews",
        category: "Cyber News",
    },
    BuiltinSource {
        name: "BleepingComputer",
        url: "https://www.bleepingcomputer.com/feed/",
        category: "Cyber News",
    },
    BuiltinSource {
        name: "Dark Reading",
        url: "https://www.darkreading.com/rss.xml",
        category: "Cyber News",
    },
    BuiltinSource {
        name: "Krebs on Security",
        url: "https://krebsonsecurity.com/feed/",
        category: "Security Research",
    },
    // ----- Vulnerabilities / CVE -----
    BuiltinSource {
        name: "NVD Vulnerabilities",
        url: "https://nvd.nist.gov/feeds/xml/cve/misc/nvd-rss.xml",
        category: "Vulnerability",
    },
    BuiltinSource {
        name: "Exploit-DB",
        url: "https://www.exploit-db.com/rss.xml",
        category: "Exploit",
    },
    // ----- Cloud / supply chain -----
    BuiltinSource {
        name: "Microsoft Security Blog",
        url: "https://www.microsoft.com/security/blog/feed/",
        category: "Cloud Security",
    },
    BuiltinSource {
        name: "GitHub Security Blog",
        url: "https://github.blog/security/feed/",
        category: "Supply Chain",
    },
];

/// Load the feed catalog: JSON override file if configured, built-in list
/// otherwise. A broken override file falls back to the built-ins with a
/// warning rather than silencing ingestion entirely.
pub fn load_sources() -> Vec<FeedSource> {
    if let Some(path) = constants::get_sources_path() {
        match std::fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|s| serde_json::from_str::<Vec<FeedSource>>(&s).map_err(|e| e.to_string()))
        {
            Ok(list) if !list.is_empty() => {
                log::info!("Loaded {} feed sources from {:?}", list.len(), path);
                return list;
            }
            Ok(_) => {
                log::warn!("Feed source file {:?} is empty, using built-ins", path);
            }
            Err(e) => {
                log::warn!("Failed to load feed sources from {:?}: {}", path, e);
            }
        }
    }
    builtin_sources()
}

/// The compiled-in catalog.
pub fn builtin_sources() -> Vec<FeedSource> {
    BUILTIN_SOURCES
        .iter()
        .map(|s| FeedSource {
            name: s.name.to_string(),
            url: s.url.to_string(),
            category: s.category.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_nonempty() {
        let sources = builtin_sources();
        assert!(!sources.is_empty());
        assert!(sources.iter().all(|s| s.url.starts_with("https://")));
    }

    #[test]
    fn test_catalog_order_is_stable() {
        let sources = builtin_sources();
        assert_eq!(sources[0].name, "CERT-IN");
    }
}
