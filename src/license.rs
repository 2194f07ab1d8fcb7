//! License analysis and risk categorization

use crate::config::LicensePolicy;
use crate::types::LicenseRisk;
use spdx::expression::{ExprNode, ExpressionReq};
use spdx::{Expression, LicenseId, LicenseItem, LicenseReq, ParseMode};

/// Analyze license and determine risk level
pub fn analyze_license(
    license: Option<&str>,
    policy: &LicensePolicy,
) -> (LicenseRisk, Vec<String>) {
    let mut warnings = Vec::new();

    let Some(license_str) = license.map(str::trim).filter(|l| !l.is_empty()) else {
        if policy.warn_on_unknown {
            warnings.push("No license information found".to_string());
        }
        return (LicenseRisk::Unknown, warnings);
    };

    if policy
        .forbidden_licenses
        .iter()
        .any(|forbidden| license_matches(license_str, forbidden))
    {
        warnings.push(format!("Uses forbidden license: {}", license_str));
        return (LicenseRisk::Proprietary, warnings);
    }

    if !policy.allowed_licenses.is_empty()
        && !policy
            .allowed_licenses
            .iter()
            .any(|allowed| license_matches(license_str, allowed))
    {
        warnings.push(format!("License {} not in allowed list", license_str));
    }

    let risk = categorize_license(license_str);

    match risk {
        LicenseRisk::Copyleft if policy.warn_on_copyleft => {
            warnings.push(format!("Copyleft license detected: {}", license_str));
        }
        LicenseRisk::Unknown if policy.warn_on_unknown => {
            warnings.push(format!("Unknown license: {}", license_str));
        }
        LicenseRisk::Proprietary => {
            warnings.push(format!("Proprietary license detected: {}", license_str));
        }
        _ => {}
    }

    (risk, warnings)
}

/// Categorize a license field into a risk level.
///
/// SPDX expressions are judged by their best satisfiable choice, so
/// `MIT OR GPL-3.0-only` is permissive while `MIT AND GPL-3.0-only` is not.
/// Anything SPDX cannot parse falls back to keyword matching.
pub fn categorize_license(license: &str) -> LicenseRisk {
    let license = license.trim();

    // npm's marker for "not licensed for use by others"
    if license.eq_ignore_ascii_case("UNLICENSED") {
        return LicenseRisk::Proprietary;
    }
    if license.to_ascii_uppercase().starts_with("SEE LICENSE IN") {
        return LicenseRisk::Unknown;
    }

    match Expression::parse_mode(license, ParseMode::LAX) {
        Ok(expression) => categorize_expression(&expression),
        Err(_) => categorize_by_name(&license.to_lowercase()),
    }
}

fn categorize_expression(expression: &Expression) -> LicenseRisk {
    if expression.evaluate(|req| spdx_id(req).is_some_and(is_permissive_id)) {
        return LicenseRisk::Permissive;
    }
    if expression.evaluate(|req| {
        spdx_id(req).is_some_and(|id| is_permissive_id(id) || id.is_copyleft())
    }) {
        return LicenseRisk::Copyleft;
    }
    LicenseRisk::Unknown
}

fn spdx_id(req: &LicenseReq) -> Option<LicenseId> {
    match &req.license {
        LicenseItem::Spdx { id, .. } => Some(*id),
        LicenseItem::Other { .. } => None,
    }
}

fn is_permissive_id(id: LicenseId) -> bool {
    !id.is_copyleft() && (id.is_osi_approved() || id.is_fsf_free_libre())
}

fn categorize_by_name(license: &str) -> LicenseRisk {
    if is_permissive(license) {
        return LicenseRisk::Permissive;
    }

    if is_copyleft(license) {
        return LicenseRisk::Copyleft;
    }

    if is_proprietary(license) {
        return LicenseRisk::Proprietary;
    }

    LicenseRisk::Unknown
}

fn is_permissive(license: &str) -> bool {
    let permissive = [
        "mit",
        "apache",
        "bsd",
        "isc",
        "0bsd",
        "unlicense",
        "cc0",
        "wtfpl",
        "zlib",
        "boost",
        "python",
        "blueoak",
    ];

    permissive.iter().any(|&p| license.contains(p))
}

fn is_copyleft(license: &str) -> bool {
    let copyleft = [
        "gpl", "lgpl", "agpl", "mpl", "eupl", "osl", "ms-pl", "cddl", "epl", "cc-by-sa",
    ];

    copyleft.iter().any(|&c| license.contains(c))
}

fn is_proprietary(license: &str) -> bool {
    let proprietary = ["proprietary", "commercial", "private", "all rights reserved"];

    proprietary.iter().any(|&p| license.contains(p))
}

/// Check whether a policy entry names `license` or one of its terms
fn license_matches(license: &str, pattern: &str) -> bool {
    let pattern_lower = pattern.trim().to_lowercase();

    if let Ok(expression) = Expression::parse_mode(license, ParseMode::LAX) {
        let named: Vec<String> = expression
            .iter()
            .filter_map(|node| match node {
                ExprNode::Req(ExpressionReq { req, .. }) => spdx_id(req),
                ExprNode::Op(_) => None,
            })
            .map(|id| id.name.to_lowercase())
            .collect();
        if !named.is_empty() {
            return named.iter().any(|name| name.contains(&pattern_lower));
        }
    }

    license.to_lowercase().contains(&pattern_lower)
}
