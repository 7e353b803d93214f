// src/services/extractor.rs

//! Value extraction from fetched documents.
//!
//! A [`Selector`] is resolved once, when the registry is built, and applied
//! to every fetched document afterwards. Extraction is pure: the same
//! document and selector always give the same result.

use std::borrow::Cow;

use encoding_rs::{Encoding, UTF_8};
use regex::Regex;
use scraper::Html;

use crate::error::{AppError, ExtractError, Result};
use crate::models::{SelectorConfig, SelectorRule};

/// Pulls one string value out of a document.
pub trait Selector: Send + Sync {
    /// Apply the selector to the document text.
    fn extract(&self, document: &str) -> std::result::Result<String, ExtractError>;

    /// Human readable form, used in logs and state snapshots.
    fn describe(&self) -> String;
}

/// Decode a response body and apply `selector` to it.
pub fn extract(
    body: &[u8],
    charset: Option<&str>,
    selector: &dyn Selector,
) -> std::result::Result<String, ExtractError> {
    selector.extract(&decode(body, charset)?)
}

/// Decode a response body to text.
///
/// The encoding is taken from the `Content-Type` charset, then from a
/// `<meta charset>` near the top of the document, then defaults to UTF-8.
/// A byte order mark overrides all of them.
pub fn decode<'a>(
    body: &'a [u8],
    charset: Option<&str>,
) -> std::result::Result<Cow<'a, str>, ExtractError> {
    let encoding = charset
        .and_then(|label| Encoding::for_label(label.trim().as_bytes()))
        .or_else(|| sniff_meta_charset(body))
        .unwrap_or(UTF_8);

    let (text, used, had_errors) = encoding.decode(body);
    if had_errors {
        return Err(ExtractError::Unparseable(format!(
            "body is not valid {}",
            used.name()
        )));
    }
    Ok(text)
}

/// Charset declared in the first 1024 bytes, e.g. `<meta charset="iso-8859-1">`
/// or `<meta http-equiv="Content-Type" content="text/html; charset=windows-1252">`.
fn sniff_meta_charset(body: &[u8]) -> Option<&'static Encoding> {
    let head = body.get(..1024).unwrap_or(body);
    let head = String::from_utf8_lossy(head).to_ascii_lowercase();
    let start = head.find("charset=")? + "charset=".len();
    let label: String = head[start..]
        .trim_start_matches(['"', '\'', ' '])
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.'))
        .collect();
    Encoding::for_label(label.as_bytes())
}

/// Compile a selector from its config form.
pub fn compile(config: &SelectorConfig) -> Result<Box<dyn Selector>> {
    let rule = match config {
        SelectorConfig::Css(css) => SelectorRule {
            css: Some(css.clone()),
            ..SelectorRule::default()
        },
        SelectorConfig::Rule(rule) => rule.clone(),
    };

    match (rule.css, rule.regex) {
        (Some(css), None) => Ok(Box::new(CssSelector::new(&css, rule.attr)?)),
        (None, Some(pattern)) => {
            if rule.attr.is_some() {
                return Err(AppError::config("'attr' only applies to css selectors"));
            }
            Ok(Box::new(RegexSelector::new(&pattern)?))
        }
        (Some(_), Some(_)) => Err(AppError::config(
            "selector sets both 'css' and 'regex'; pick one",
        )),
        (None, None) => Err(AppError::config("selector is empty")),
    }
}

/// CSS selector over parsed HTML.
///
/// Without `attr`, the value is the text of every matching element joined
/// together with whitespace collapsed. With `attr`, it is that attribute of
/// the first matching element carrying it.
pub struct CssSelector {
    source: String,
    selector: scraper::Selector,
    attr: Option<String>,
}

impl CssSelector {
    pub fn new(source: &str, attr: Option<String>) -> Result<Self> {
        let source = source.trim();
        if source.is_empty() {
            return Err(AppError::config("selector is empty"));
        }
        let selector = scraper::Selector::parse(source)
            .map_err(|e| AppError::config(format!("invalid selector '{source}': {e:?}")))?;
        let attr = attr.map(|a| a.trim().to_string()).filter(|a| !a.is_empty());

        Ok(Self {
            source: source.to_string(),
            selector,
            attr,
        })
    }
}

impl Selector for CssSelector {
    fn extract(&self, document: &str) -> std::result::Result<String, ExtractError> {
        let html = Html::parse_document(document);
        let mut matches = html.select(&self.selector).peekable();
        if matches.peek().is_none() {
            return Err(self.no_match());
        }

        match &self.attr {
            Some(attr) => matches
                .find_map(|el| el.value().attr(attr))
                .map(normalize_whitespace)
                .ok_or_else(|| self.no_match()),
            None => {
                let text: String = matches.flat_map(|el| el.text()).collect();
                Ok(normalize_whitespace(&text))
            }
        }
    }

    fn describe(&self) -> String {
        match &self.attr {
            Some(attr) => format!("css:{}@{}", self.source, attr),
            None => format!("css:{}", self.source),
        }
    }
}

impl CssSelector {
    fn no_match(&self) -> ExtractError {
        ExtractError::NoMatch {
            selector: self.describe(),
        }
    }
}

/// Regular expression over the raw document text.
///
/// The value is capture group 1 when the pattern has one, otherwise the
/// whole first match, trimmed.
pub struct RegexSelector {
    regex: Regex,
}

impl RegexSelector {
    pub fn new(pattern: &str) -> Result<Self> {
        if pattern.trim().is_empty() {
            return Err(AppError::config("selector is empty"));
        }
        let regex = Regex::new(pattern)
            .map_err(|e| AppError::config(format!("invalid regex '{pattern}': {e}")))?;
        Ok(Self { regex })
    }
}

impl Selector for RegexSelector {
    fn extract(&self, document: &str) -> std::result::Result<String, ExtractError> {
        let caps = self
            .regex
            .captures(document)
            .ok_or_else(|| ExtractError::NoMatch {
                selector: self.describe(),
            })?;
        let matched = caps.get(1).or_else(|| caps.get(0)).map_or("", |m| m.as_str());
        Ok(matched.trim().to_string())
    }

    fn describe(&self) -> String {
        format!("regex:{}", self.regex.as_str())
    }
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRODUCT: &str = r#"
        <html><body>
          <span id="productTitle">
            Nintendo Switch
          </span>
          <div id="availability">
            <span>Disponibilità
               immediata</span>
          </div>
          <div id="empty"><span></span></div>
          <meta itemprop="price" content=" 329,99 ">
          <p>Price: 329,99 EUR</p>
        </body></html>
    "#;

    fn css(s: &str) -> Box<dyn Selector> {
        compile(&SelectorConfig::Css(s.into())).unwrap()
    }

    #[test]
    fn css_text_is_trimmed_and_collapsed() {
        let value = extract(PRODUCT.as_bytes(), None, css("#availability span").as_ref()).unwrap();
        assert_eq!(value, "Disponibilità immediata");
        let title = extract(PRODUCT.as_bytes(), None, css("#productTitle").as_ref()).unwrap();
        assert_eq!(title, "Nintendo Switch");
    }

    #[test]
    fn css_matching_empty_element_yields_empty_string() {
        let value = extract(PRODUCT.as_bytes(), None, css("#empty span").as_ref()).unwrap();
        assert_eq!(value, "");
    }

    #[test]
    fn css_no_match_is_an_error() {
        let err = extract(PRODUCT.as_bytes(), None, css("#outOfStock").as_ref()).unwrap_err();
        assert!(matches!(err, ExtractError::NoMatch { .. }));
    }

    #[test]
    fn css_attribute() {
        let selector = compile(&SelectorConfig::Rule(SelectorRule {
            css: Some("meta[itemprop=price]".into()),
            attr: Some("content".into()),
            regex: None,
        }))
        .unwrap();
        assert_eq!(extract(PRODUCT.as_bytes(), None, selector.as_ref()).unwrap(), "329,99");
        assert_eq!(selector.describe(), "css:meta[itemprop=price]@content");
    }

    #[test]
    fn regex_prefers_first_group() {
        let with_group = RegexSelector::new(r"Price: ([0-9.,]+)").unwrap();
        assert_eq!(with_group.extract(PRODUCT).unwrap(), "329,99");

        let whole = RegexSelector::new(r"[0-9]+,[0-9]+ EUR").unwrap();
        assert_eq!(whole.extract(PRODUCT).unwrap(), "329,99 EUR");

        assert!(matches!(
            RegexSelector::new("Sold out").unwrap().extract(PRODUCT),
            Err(ExtractError::NoMatch { .. })
        ));
    }

    #[test]
    fn undeclared_invalid_utf8_is_unparseable() {
        let err = extract(&[b'<', b'p', b'>', 0xc3, 0x28], None, css("p").as_ref()).unwrap_err();
        assert!(matches!(err, ExtractError::Unparseable(_)));
    }

    fn latin1_page(head: &str) -> Vec<u8> {
        let mut body = format!("<html><head>{head}</head><body><span id=\"a\">Disponibilit").into_bytes();
        body.push(0xe0); // 'à' in ISO-8859-1
        body.extend_from_slice(b" immediata</span></body></html>");
        body
    }

    #[test]
    fn latin1_body_decoded_from_content_type_charset() {
        let body = latin1_page("");
        let value = extract(&body, Some("ISO-8859-1"), css("#a").as_ref()).unwrap();
        assert_eq!(value, "Disponibilità immediata");
    }

    #[test]
    fn latin1_body_decoded_from_meta_charset() {
        let body = latin1_page(r#"<meta charset="windows-1252">"#);
        let value = extract(&body, None, css("#a").as_ref()).unwrap();
        assert_eq!(value, "Disponibilità immediata");

        let body = latin1_page(
            r#"<meta http-equiv="Content-Type" content="text/html; charset=iso-8859-1">"#,
        );
        assert_eq!(
            extract(&body, None, css("#a").as_ref()).unwrap(),
            "Disponibilità immediata"
        );
    }

    #[test]
    fn unknown_charset_label_falls_back_to_utf8() {
        let value = extract(PRODUCT.as_bytes(), Some("x-made-up"), css("#productTitle").as_ref());
        assert_eq!(value.unwrap(), "Nintendo Switch");
    }

    #[test]
    fn extraction_is_deterministic() {
        let selector = css("#availability span");
        let a = extract(PRODUCT.as_bytes(), None, selector.as_ref());
        let b = extract(PRODUCT.as_bytes(), None, selector.as_ref());
        assert_eq!(a, b);
    }

    #[test]
    fn compile_rejects_bad_rules() {
        assert!(compile(&SelectorConfig::Css("   ".into())).is_err());
        assert!(compile(&SelectorConfig::Css("[[invalid".into())).is_err());
        assert!(compile(&SelectorConfig::Rule(SelectorRule::default())).is_err());
        assert!(
            compile(&SelectorConfig::Rule(SelectorRule {
                css: Some("p".into()),
                attr: None,
                regex: Some("x".into()),
            }))
            .is_err()
        );
        assert!(
            compile(&SelectorConfig::Rule(SelectorRule {
                css: None,
                attr: None,
                regex: Some("(unclosed".into()),
            }))
            .is_err()
        );
    }
}
