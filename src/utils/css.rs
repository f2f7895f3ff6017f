//! Stylesheet post-processing: vendor prefixes and minification.

use anyhow::{Result, anyhow};
use lightningcss::{
    properties::Property,
    rules::{CssRule, CssRuleList},
    stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet},
    targets::{Browsers, Targets},
    vendor_prefix::VendorPrefix,
};

/// Encode a browser version the way lightningcss expects it.
const fn version(major: u32, minor: u32) -> Option<u32> {
    Some((major << 16) | (minor << 8))
}

/// Browsers the finalized stylesheets must support.
///
/// Roughly "last two versions" at the time the boilerplate targeted IE-less
/// evergreen browsers plus older mobile Safari and Android.
fn browser_targets() -> Targets {
    Targets::from(Browsers {
        android: version(4, 4),
        chrome: version(49, 0),
        edge: version(15, 0),
        firefox: version(45, 0),
        ios_saf: version(9, 0),
        safari: version(9, 0),
        ..Browsers::default()
    })
}

/// Add vendor prefixes for the supported browsers, then optionally minify.
///
/// Without `minify`, rules and declarations keep their structure and order;
/// prefixed variants are added next to the declarations that need them.
///
/// `filename` only appears in parse error locations.
pub fn prefix(source: &str, filename: &str, minify: bool) -> Result<String> {
    let targets = browser_targets();
    let options = ParserOptions {
        filename: filename.to_owned(),
        ..ParserOptions::default()
    };

    let mut stylesheet =
        StyleSheet::parse(source, options).map_err(|e| anyhow!("{filename}: {e}"))?;

    if minify {
        // Prefixing happens inside the minify pass
        stylesheet
            .minify(MinifyOptions {
                targets,
                ..MinifyOptions::default()
            })
            .map_err(|e| anyhow!("{filename}: {e}"))?;
    } else {
        prefix_rules(&mut stylesheet.rules, targets);
    }

    let output = stylesheet
        .to_css(PrinterOptions {
            minify,
            targets,
            ..PrinterOptions::default()
        })
        .map_err(|e| anyhow!("{filename}: {e}"))?;

    Ok(output.code)
}

fn prefix_rules(rules: &mut CssRuleList<'_>, targets: Targets) {
    for rule in &mut rules.0 {
        match rule {
            CssRule::Style(style) => {
                prefix_declarations(&mut style.declarations.declarations, false, targets);
                prefix_declarations(&mut style.declarations.important_declarations, true, targets);
                prefix_rules(&mut style.rules, targets);
            }
            CssRule::Media(media) => prefix_rules(&mut media.rules, targets),
            CssRule::Supports(supports) => prefix_rules(&mut supports.rules, targets),
            _ => {}
        }
    }
}

/// Give every unprefixed declaration the prefixes the targets need.
///
/// Declarations already written with a vendor prefix are left alone.
fn prefix_declarations(declarations: &mut [Property<'_>], important: bool, targets: Targets) {
    for property in declarations {
        if property.property_id().prefix() != VendorPrefix::None {
            continue;
        }
        if let Some(prefixes) = required_prefixes(property, important, targets) {
            property.set_prefix(prefixes);
        }
    }
}

/// Prefixes lightningcss emits for `property` on its own, when it adds any.
fn required_prefixes(
    property: &Property<'_>,
    important: bool,
    targets: Targets,
) -> Option<VendorPrefix> {
    let declaration = property
        .to_css_string(important, PrinterOptions::default())
        .ok()?;
    let source = format!("a{{{declaration}}}");
    let mut isolated = StyleSheet::parse(&source, ParserOptions::default()).ok()?;
    isolated
        .minify(MinifyOptions {
            targets,
            ..MinifyOptions::default()
        })
        .ok()?;

    let CssRule::Style(rule) = isolated.rules.0.first()? else {
        return None;
    };
    let id = property.property_id();
    let prefixes = rule
        .declarations
        .declarations
        .iter()
        .chain(&rule.declarations.important_declarations)
        .map(Property::property_id)
        .filter(|found| found.name() == id.name())
        .fold(VendorPrefix::empty(), |all, found| all | found.prefix());

    (prefixes != VendorPrefix::None && !prefixes.is_empty()).then_some(prefixes)
}
