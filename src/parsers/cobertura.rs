/// Parser for Cobertura XML coverage reports.
///
/// Cobertura XML structure:
///   <coverage line-rate="..." branch-rate="..." lines-valid="..." ...>
///     <sources><source>...</source></sources>
///     <packages>
///       <package name="...">
///         <classes>
///           <class name="..." filename="..." line-rate="..." branch-rate="...">
///             <methods>
///               <method name="..." signature="..." line-rate="..." complexity="...">
///                 <lines><line number="..." hits="..." .../></lines>
///               </method>
///             </methods>
///             <lines>
///               <line number="..." hits="..." branch="true|false"
///                     condition-coverage="50% (1/2)" />
///             </lines>
///           </class>
///         </classes>
///       </package>
///     </packages>
///   </coverage>
use std::collections::HashMap;
use std::str;

use chrono::Utc;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::aggregate::{counter, rate_percentage, summary_from_attributes, FileTally, MethodTally};
use crate::error::{CovwatchError, Result};
use crate::model::{CoverageReport, CoverageSummary};
use crate::parsers::Parser;

#[derive(Debug, Clone, Copy, Default)]
pub struct CoberturaParser;

impl Parser for CoberturaParser {
    fn parse(&self, input: &[u8]) -> Result<CoverageReport> {
        parse_cobertura(input)
    }
}

fn parse_cobertura(input: &[u8]) -> Result<CoverageReport> {
    let mut reader = Reader::from_reader(input);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut summary: Option<CoverageSummary> = None;
    let mut files = Vec::new();

    // State tracking
    let mut current_file: Option<FileTally> = None;
    let mut current_method: Option<MethodTally> = None;

    // Source prefix from <source> elements
    let mut sources: Vec<String> = Vec::new();
    let mut in_source = false;

    loop {
        let event = reader.read_event_into(&mut buf);
        let is_start_event = matches!(&event, Ok(Event::Start(_)));
        match event {
            Err(source) => {
                return Err(CovwatchError::Xml {
                    source,
                    position: reader.buffer_position(),
                })
            }
            Ok(Event::Eof) => break,
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                let local_name = e.local_name();
                let local = local_name.as_ref();

                if summary.is_none() {
                    if local != b"coverage" {
                        return Err(CovwatchError::UnexpectedRoot(
                            String::from_utf8_lossy(local).into_owned(),
                        ));
                    }
                    summary = Some(summary_from_attributes(&attr_map(e)));
                }

                match local {
                    b"source" => {
                        // A self-closing <source/> has no text and no End
                        // event, so only a Start opens text capture.
                        if is_start_event {
                            in_source = true;
                        }
                    }
                    b"class" => {
                        // A self-closing class has no lines to record.
                        if is_start_event {
                            let attrs = attr_map(e);
                            current_file = attrs
                                .get("filename")
                                .filter(|f| !f.trim().is_empty())
                                .map(|f| FileTally::new(resolve_source_path(f, &sources)));
                            current_method = None;
                        }
                    }
                    b"method" => {
                        if let Some(file) = current_file.as_mut() {
                            let attrs = attr_map(e);
                            let method = MethodTally::new(
                                attrs.get("name").cloned().unwrap_or_default(),
                                attrs.get("signature").cloned().unwrap_or_default(),
                                rate_percentage(attrs.get("line-rate").map(String::as_str)),
                                counter(attrs.get("complexity").map(String::as_str)),
                            );
                            if is_start_event {
                                current_method = Some(method);
                            } else {
                                file.push_method(method.finish());
                            }
                        }
                    }
                    b"line" => {
                        if let Some(file) = current_file.as_mut() {
                            let attrs = attr_map(e);
                            // Lines without a usable number are skipped before
                            // any counter is touched.
                            let number = attrs
                                .get("number")
                                .and_then(|n| n.trim().parse::<u32>().ok())
                                .filter(|n| *n > 0);
                            if let Some(number) = number {
                                let hits: u64 = counter(attrs.get("hits").map(String::as_str));
                                file.record_line(
                                    number,
                                    hits,
                                    attrs.get("condition-coverage").map(String::as_str),
                                );
                                if let Some(method) = current_method.as_mut() {
                                    method.observe_line(number);
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(ref e)) => {
                if in_source {
                    if let Ok(text) = e.unescape() {
                        sources.push(text.to_string());
                    }
                    in_source = false;
                }
            }
            Ok(Event::End(ref e)) => {
                let local_name = e.local_name();
                match local_name.as_ref() {
                    b"source" => {
                        in_source = false;
                    }
                    b"method" => {
                        if let (Some(file), Some(method)) =
                            (current_file.as_mut(), current_method.take())
                        {
                            file.push_method(method.finish());
                        }
                    }
                    b"class" => {
                        if let Some(file) = current_file.take().and_then(FileTally::finish) {
                            files.push(file);
                        }
                        current_method = None;
                    }
                    _ => {}
                }
            }
            _ => {}
        }
        buf.clear();
    }

    let summary = summary.ok_or(CovwatchError::MissingRoot)?;

    // Handle unclosed class
    if let Some(mut file) = current_file.take() {
        if let Some(method) = current_method.take() {
            file.push_method(method.finish());
        }
        if let Some(file) = file.finish() {
            files.push(file);
        }
    }

    Ok(CoverageReport {
        timestamp: Utc::now(),
        run_id: String::new(),
        summary,
        files,
    })
}

/// Resolve a filename against the list of `<source>` prefixes.
///
/// - If the filename is already absolute, return it as-is.
/// - Otherwise, prepend the first non-empty source prefix.
/// - If no non-empty sources exist, return the filename unchanged.
fn resolve_source_path(filename: &str, sources: &[String]) -> String {
    if is_absolute(filename) {
        return filename.to_string();
    }
    for source in sources {
        let base = source.trim_end_matches(['/', '\\']);
        if !base.is_empty() {
            let sep = if base.contains('\\') { '\\' } else { '/' };
            return format!("{base}{sep}{filename}");
        }
    }
    filename.to_string()
}

/// Absolute in either Unix or Windows form, independent of the host.
fn is_absolute(path: &str) -> bool {
    let bytes = path.as_bytes();
    path.starts_with('/')
        || path.starts_with('\\')
        || (bytes.len() > 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':')
}

/// Extract attributes from an XML element into a HashMap.
fn attr_map(e: &BytesStart) -> HashMap<String, String> {
    e.attributes()
        .filter_map(|a| {
            let attr = a.ok()?;
            let key = str::from_utf8(attr.key.local_name().into_inner())
                .ok()?
                .to_string();
            let value = attr.unescape_value().ok()?.to_string();
            Some((key, value))
        })
        .collect()
}
