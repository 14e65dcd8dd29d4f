//! Generated zone-list configuration.
//!
//! A small JSON template turns the set of zones in a tree into one extra
//! config file, so adding a zone file is enough to get it served:
//!
//! ```json
//! {
//!   "header": "# generated, do not edit\nzone:\n",
//!   "footer": "",
//!   "item": "  - domain: $zonename\n    file: $zonefile\n    $zonevar\n",
//!   "defaultvar": "template: default",
//!   "zonevars": { "example.com": "template: signed", "*.arpa": "template: reverse" }
//! }
//! ```
//!
//! Placeholders: `$zonename`, `$zonefile` (path under the deployed root),
//! `$zonerelfile` (path under the zones directory) and `$zonevar`. Write `$$`
//! for a literal dollar sign. Rendering is deterministic: there is no
//! timestamp placeholder and zones are listed in name order.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::build::ZONES_SUBDIR;
use crate::config::ZoneListConfig;
use crate::model::{ConfigArtifact, SourceTree, ZoneArtifact};

#[derive(Debug, Error)]
pub enum ZoneListError {
    #[error("zone-list template {0} is not part of the config bundle")]
    MissingTemplate(String),

    #[error("invalid zone-list template: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("unknown placeholder ${0} in zone-list template")]
    UnknownPlaceholder(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneListTemplate {
    pub header: String,
    pub footer: String,
    pub item: String,
    pub defaultvar: String,
    pub zonevars: BTreeMap<String, String>,
}

/// Lookup keys for `name`, most specific first.
///
/// `a.example.com` yields `a.example.com`, `*.example.com`, `*.com`, `*`.
pub fn zone_wildcards(name: &str) -> Vec<String> {
    let mut out = vec![name.to_string()];
    let labels: Vec<&str> = name.split('.').collect();
    for skip in 0..labels.len() {
        let rest = &labels[skip + 1..];
        if rest.is_empty() {
            out.push("*".to_string());
        } else {
            out.push(format!("*.{}", rest.join(".")));
        }
    }
    out
}

fn matches_any(name: &str, patterns: &[String]) -> bool {
    zone_wildcards(name)
        .iter()
        .any(|candidate| patterns.iter().any(|p| p == candidate))
}

impl ZoneListTemplate {
    pub fn from_json(bytes: &[u8]) -> Result<Self, ZoneListError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn zonevar(&self, name: &str) -> &str {
        zone_wildcards(name)
            .iter()
            .find_map(|key| self.zonevars.get(key))
            .map(String::as_str)
            .unwrap_or(&self.defaultvar)
    }

    /// Render the zone list for `zones`, honouring allow and deny patterns.
    pub fn render(
        &self,
        zones: &BTreeMap<String, ZoneArtifact>,
        allow: &[String],
        deny: &[String],
    ) -> Result<String, ZoneListError> {
        let mut out = Vec::new();
        if !self.header.is_empty() {
            out.push(substitute(&self.header, &[])?);
        }

        for (name, zone) in zones {
            if !allow.is_empty() && !matches_any(name, allow) {
                warn!(zone = %name, "zone not in allow list, left out of zone list");
                continue;
            }
            if matches_any(name, deny) {
                warn!(zone = %name, "zone in deny list, left out of zone list");
                continue;
            }
            let zonefile = Path::new(ZONES_SUBDIR).join(&zone.path);
            let relfile = zone.path.display().to_string();
            let zonefile = zonefile.display().to_string();
            out.push(substitute(
                &self.item,
                &[
                    ("zonename", name.as_str()),
                    ("zonefile", zonefile.as_str()),
                    ("zonerelfile", relfile.as_str()),
                    ("zonevar", self.zonevar(name)),
                ],
            )?);
        }

        if !self.footer.is_empty() {
            out.push(substitute(&self.footer, &[])?);
        }
        Ok(out.join("\n"))
    }
}

/// Render the configured zone list into `tree`'s config bundle.
pub fn apply(tree: &mut SourceTree, config: &ZoneListConfig) -> Result<(), ZoneListError> {
    let template = tree
        .config
        .get(&config.template)
        .ok_or_else(|| ZoneListError::MissingTemplate(config.template.display().to_string()))?;
    let rendered = ZoneListTemplate::from_json(&template.content)?.render(
        &tree.zones,
        &config.allow,
        &config.deny,
    )?;
    tree.config.insert(
        config.output.clone(),
        ConfigArtifact::new(config.output.clone(), rendered.into_bytes()),
    );
    Ok(())
}

/// `$name` / `${name}` substitution; `$$` is a literal `$`.
fn substitute(template: &str, vars: &[(&str, &str)]) -> Result<String, ZoneListError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(tail) = after.strip_prefix('$') {
            out.push('$');
            rest = tail;
            continue;
        }

        let (key, tail) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], &braced[end + 1..]),
                None => return Err(ZoneListError::UnknownPlaceholder(after.to_string())),
            }
        } else {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..end], &after[end..])
        };

        match vars.iter().find(|(name, _)| *name == key) {
            Some((_, value)) => out.push_str(value),
            None => return Err(ZoneListError::UnknownPlaceholder(key.to_string())),
        }
        rest = tail;
    }

    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const TEMPLATE: &str = r#"{
        "header": "zone:",
        "item": "  - domain: $zonename\n    file: $zonefile\n    $zonevar",
        "defaultvar": "template: default",
        "zonevars": {
            "example.com": "template: signed",
            "*.arpa": "template: reverse"
        }
    }"#;

    fn zones(names: &[&str]) -> BTreeMap<String, ZoneArtifact> {
        names
            .iter()
            .map(|n| {
                (
                    n.to_string(),
                    ZoneArtifact::new(*n, format!("{n}.zone"), Vec::new()),
                )
            })
            .collect()
    }

    #[test]
    fn wildcards_go_from_specific_to_catch_all() {
        assert_eq!(
            zone_wildcards("a.example.com"),
            vec!["a.example.com", "*.example.com", "*.com", "*"]
        );
        assert_eq!(zone_wildcards("com"), vec!["com", "*"]);
    }

    #[test]
    fn render_uses_most_specific_zonevar() {
        let tpl = ZoneListTemplate::from_json(TEMPLATE.as_bytes()).unwrap();
        let out = tpl
            .render(&zones(&["example.com", "2.0.192.in-addr.arpa", "example.org"]), &[], &[])
            .unwrap();
        assert_eq!(
            out,
            "zone:\n\
             \x20 - domain: 2.0.192.in-addr.arpa\n    file: zones/2.0.192.in-addr.arpa.zone\n    template: reverse\n\
             \x20 - domain: example.com\n    file: zones/example.com.zone\n    template: signed\n\
             \x20 - domain: example.org\n    file: zones/example.org.zone\n    template: default"
        );
    }

    #[test]
    fn allow_and_deny_filter_zones() {
        let tpl = ZoneListTemplate {
            item: "$zonename".to_string(),
            ..ZoneListTemplate::default()
        };
        let all = zones(&["a.example.com", "b.example.com", "example.org"]);

        let allowed = tpl.render(&all, &["*.example.com".to_string()], &[]).unwrap();
        assert_eq!(allowed, "a.example.com\nb.example.com");

        let denied = tpl
            .render(&all, &[], &["b.example.com".to_string(), "*.org".to_string()])
            .unwrap();
        assert_eq!(denied, "a.example.com");
    }

    #[test]
    fn unknown_placeholder_is_an_error() {
        let tpl = ZoneListTemplate {
            header: "# generated $datetime".to_string(),
            ..ZoneListTemplate::default()
        };
        assert!(matches!(
            tpl.render(&BTreeMap::new(), &[], &[]),
            Err(ZoneListError::UnknownPlaceholder(p)) if p == "datetime"
        ));
    }

    #[test]
    fn braces_and_escaped_dollar() {
        assert_eq!(
            substitute("${zonename}x costs $$5", &[("zonename", "a")]).unwrap(),
            "ax costs $5"
        );
    }

    #[test]
    fn apply_adds_rendered_file_to_bundle() {
        let mut tree = SourceTree::new("r1")
            .with_zone(ZoneArtifact::new("example.com", "example.com.zone", Vec::new()))
            .with_config(ConfigArtifact::new("zonelist.json", TEMPLATE.as_bytes().to_vec()));
        let config = ZoneListConfig {
            template: PathBuf::from("zonelist.json"),
            output: PathBuf::from("zones.conf"),
            allow: Vec::new(),
            deny: Vec::new(),
        };

        apply(&mut tree, &config).unwrap();
        let rendered = &tree.config[&PathBuf::from("zones.conf")];
        assert!(String::from_utf8_lossy(&rendered.content).contains("domain: example.com"));
    }

    #[test]
    fn apply_without_template_fails() {
        let mut tree = SourceTree::new("r1");
        let config = ZoneListConfig {
            template: PathBuf::from("missing.json"),
            output: PathBuf::from("zones.conf"),
            allow: Vec::new(),
            deny: Vec::new(),
        };
        assert!(matches!(
            apply(&mut tree, &config),
            Err(ZoneListError::MissingTemplate(_))
        ));
    }
}
