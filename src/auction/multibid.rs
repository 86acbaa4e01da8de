// src/auction/multibid.rs

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::openrtb::request::ExtRequestPrebidMultiBid;

/// **单个合作方的多出价配置**
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MultiBidConfig {
    pub bidder: String,
    pub max_bids: u32,
    pub target_bidder_code_prefix: Option<String>,
}

impl MultiBidConfig {
    /// 写回到发给该合作方的 ext.prebid.multibid
    pub fn to_ext(&self) -> ExtRequestPrebidMultiBid {
        ExtRequestPrebidMultiBid {
            bidder: Some(self.bidder.clone()),
            bidders: None,
            maxbids: Some(self.max_bids),
            targetbiddercodeprefix: self.target_bidder_code_prefix.clone(),
        }
    }
}

fn format_list(bidders: &[String]) -> String {
    format!("[{}]", bidders.join(", "))
}

/// 校验并合并请求中的 multibid 声明
/// 同一合作方以最先声明的为准，后续声明只产生警告。
pub fn resolve_multibid(declarations: &[ExtRequestPrebidMultiBid]) -> (HashMap<String, MultiBidConfig>, Vec<String>) {
    let mut configs: HashMap<String, MultiBidConfig> = HashMap::new();
    let mut warnings = Vec::new();

    for declaration in declarations {
        let bidders = declaration.bidders.as_deref().filter(|b| !b.is_empty());

        match (declaration.bidder.as_deref(), bidders) {
            (Some(bidder), bidders) => {
                if let Some(bidders) = bidders {
                    warnings.push(format!(
                        "Invalid MultiBid: bidder {} and bidders {} specified. Only bidder {} will be used.",
                        bidder,
                        format_list(bidders),
                        bidder
                    ));
                }

                let Some(max_bids) = declaration.maxbids else {
                    warnings.push(format!(
                        "Invalid MultiBid: MaxBids for bidder {} is not specified and will be skipped.",
                        bidder
                    ));
                    continue;
                };

                if configs.contains_key(bidder) {
                    warnings.push(format!("Invalid MultiBid: Bidder {} specified multiple times.", bidder));
                    continue;
                }

                configs.insert(
                    bidder.to_string(),
                    MultiBidConfig {
                        bidder: bidder.to_string(),
                        max_bids,
                        target_bidder_code_prefix: declaration.targetbiddercodeprefix.clone(),
                    },
                );
            }
            (None, Some(bidders)) => {
                if let Some(prefix) = &declaration.targetbiddercodeprefix {
                    warnings.push(format!(
                        "Invalid MultiBid: CodePrefix {} that was specified for bidders {} will be skipped.",
                        prefix,
                        format_list(bidders)
                    ));
                }

                let Some(max_bids) = declaration.maxbids else {
                    warnings.push(format!(
                        "Invalid MultiBid: MaxBids for bidders {} is not specified and will be skipped.",
                        format_list(bidders)
                    ));
                    continue;
                };

                for bidder in bidders {
                    if configs.contains_key(bidder) {
                        warnings.push(format!("Invalid MultiBid: Bidder {} specified multiple times.", bidder));
                        continue;
                    }
                    configs.insert(
                        bidder.clone(),
                        MultiBidConfig {
                            bidder: bidder.clone(),
                            max_bids,
                            target_bidder_code_prefix: None,
                        },
                    );
                }
            }
            (None, None) => {
                warnings.push("Invalid MultiBid: Bidder or bidders should be specified and will be skipped.".to_string());
            }
        }
    }

    (configs, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn declaration(
        bidder: Option<&str>,
        bidders: Option<&[&str]>,
        maxbids: Option<u32>,
        prefix: Option<&str>,
    ) -> ExtRequestPrebidMultiBid {
        ExtRequestPrebidMultiBid {
            bidder: bidder.map(str::to_string),
            bidders: bidders.map(|b| b.iter().map(|s| s.to_string()).collect()),
            maxbids,
            targetbiddercodeprefix: prefix.map(str::to_string),
        }
    }

    #[test]
    fn test_resolve_multibid_warnings_and_first_declaration_wins() {
        let declarations = vec![
            declaration(Some("bidder1"), None, Some(2), Some("bi1")),
            declaration(Some("bidder2"), Some(&["invalid"]), Some(4), Some("bi2")),
            declaration(Some("bidder3"), Some(&["invalid"]), None, Some("bi3")),
            declaration(Some("bidder1"), None, Some(100), Some("bi1_2")),
            declaration(None, Some(&["bidder1"]), Some(100), Some("bi1_3")),
            declaration(None, Some(&["bidder4", "bidder5"]), Some(3), Some("ignored")),
        ];

        let (configs, warnings) = resolve_multibid(&declarations);

        assert_eq!(
            warnings,
            vec![
                "Invalid MultiBid: bidder bidder2 and bidders [invalid] specified. Only bidder bidder2 will be used.",
                "Invalid MultiBid: bidder bidder3 and bidders [invalid] specified. Only bidder bidder3 will be used.",
                "Invalid MultiBid: MaxBids for bidder bidder3 is not specified and will be skipped.",
                "Invalid MultiBid: Bidder bidder1 specified multiple times.",
                "Invalid MultiBid: CodePrefix bi1_3 that was specified for bidders [bidder1] will be skipped.",
                "Invalid MultiBid: Bidder bidder1 specified multiple times.",
                "Invalid MultiBid: CodePrefix ignored that was specified for bidders [bidder4, bidder5] will be skipped.",
            ]
        );

        assert_eq!(configs.len(), 4);
        assert_eq!(configs["bidder1"].max_bids, 2);
        assert_eq!(configs["bidder1"].target_bidder_code_prefix.as_deref(), Some("bi1"));
        assert_eq!(configs["bidder2"].target_bidder_code_prefix.as_deref(), Some("bi2"));
        assert_eq!(configs["bidder4"].max_bids, 3);
        assert_eq!(configs["bidder5"].target_bidder_code_prefix, None);
        assert!(!configs.contains_key("bidder3"));
    }

    #[test]
    fn test_empty_declaration_is_dropped() {
        let (configs, warnings) = resolve_multibid(&[declaration(None, None, Some(2), None)]);
        assert!(configs.is_empty());
        assert_eq!(warnings.len(), 1);
    }
}
