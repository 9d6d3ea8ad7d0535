//! Parser for the declarative model language.
//!
//! Each specification string compiles into one or more [`Instruction`]s:
//!
//! - `name[v]`, `name[lo,hi]`, `name[v,lo,hi]` define a parameter
//! - `{a0[...], a1[...]}` defines several parameters at once
//! - `Kind::name(x, args...)` defines a shape; parameters written inline in the
//!   argument list are emitted as their own instructions first

use crate::error::CompositionError;

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Parameter(ParameterSpec),
    Shape(ShapeSpec),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpec {
    pub name: String,
    pub value: f64,
    /// `None` for constants.
    pub bounds: Option<(f64, f64)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShapeSpec {
    pub name: String,
    pub observable: String,
    pub kind: ShapeSpecKind,
}

/// Shape kinds with their arguments still given by name.
#[derive(Debug, Clone, PartialEq)]
pub enum ShapeSpecKind {
    Gaussian {
        mean: String,
        sigma: String,
    },
    CrystalBallGauss {
        mean: String,
        sigma: String,
        alpha: String,
        n: String,
        sigma2: String,
        sos: String,
    },
    Chebychev {
        coefficients: Vec<String>,
    },
    Polynomial {
        coefficients: Vec<String>,
    },
    Exponential {
        slope: String,
    },
    CmsShape {
        alpha: String,
        beta: String,
        gamma: String,
        peak: String,
    },
    Histogram {
        data: String,
        order: usize,
    },
    Convolution {
        physics: String,
        resolution: String,
    },
}

/// One parsed shape argument.
enum Arg {
    Name(String),
    List(Vec<String>),
}

/// Parse a whole specification list, preserving order.
pub fn parse_specs<S: AsRef<str>>(lines: &[S]) -> Result<Vec<Instruction>, CompositionError> {
    let mut out = Vec::new();
    for line in lines {
        out.extend(parse_spec(line.as_ref())?);
    }
    Ok(out)
}

pub fn parse_spec(text: &str) -> Result<Vec<Instruction>, CompositionError> {
    let trimmed = text.trim();
    let mut out = Vec::new();
    if trimmed.starts_with('{') {
        for item in split_group(text, trimmed)? {
            out.push(Instruction::Parameter(parse_parameter(text, item)?));
        }
    } else if trimmed.contains("::") {
        let shape = parse_shape(text, trimmed, &mut out)?;
        out.push(Instruction::Shape(shape));
    } else {
        out.push(Instruction::Parameter(parse_parameter(text, trimmed)?));
    }
    Ok(out)
}

fn syntax(text: &str, reason: impl Into<String>) -> CompositionError {
    CompositionError::Syntax {
        text: text.to_string(),
        reason: reason.into(),
    }
}

fn split_group<'t>(text: &str, group: &'t str) -> Result<Vec<&'t str>, CompositionError> {
    let inner = group
        .strip_prefix('{')
        .and_then(|g| g.strip_suffix('}'))
        .ok_or_else(|| syntax(text, "unbalanced braces"))?;
    let items: Vec<&str> = split_top_level(text, inner)?
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect();
    if items.is_empty() {
        return Err(syntax(text, "empty group"));
    }
    Ok(items)
}

/// Split on commas that are not nested in brackets, braces or parentheses.
fn split_top_level<'t>(text: &str, s: &'t str) -> Result<Vec<&'t str>, CompositionError> {
    let mut parts = Vec::new();
    let mut depth = 0_i32;
    let mut start = 0;
    for (i, ch) in s.char_indices() {
        match ch {
            '[' | '{' | '(' => depth += 1,
            ']' | '}' | ')' => {
                depth -= 1;
                if depth < 0 {
                    return Err(syntax(text, format!("unexpected '{ch}'")));
                }
            }
            ',' if depth == 0 => {
                parts.push(s[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(syntax(text, "unbalanced brackets"));
    }
    parts.push(s[start..].trim());
    Ok(parts)
}

fn check_identifier(text: &str, name: &str) -> Result<(), CompositionError> {
    let mut chars = name.chars();
    let ok = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(syntax(text, format!("'{name}' is not a valid name")))
    }
}

fn parse_parameter(text: &str, item: &str) -> Result<ParameterSpec, CompositionError> {
    let open = item
        .find('[')
        .ok_or_else(|| syntax(text, format!("expected '[' in '{item}'")))?;
    let name = item[..open].trim();
    check_identifier(text, name)?;
    let body = item[open + 1..]
        .trim_end()
        .strip_suffix(']')
        .ok_or_else(|| syntax(text, format!("expected ']' at the end of '{item}'")))?;

    let numbers = body
        .split(',')
        .map(|n| {
            n.trim()
                .parse::<f64>()
                .map_err(|_| syntax(text, format!("'{}' is not a number", n.trim())))
        })
        .collect::<Result<Vec<f64>, _>>()?;

    let (value, bounds) = match numbers.as_slice() {
        [v] => (*v, None),
        [lo, hi] => (0.5 * (lo + hi), Some((*lo, *hi))),
        [v, lo, hi] => (*v, Some((*lo, *hi))),
        _ => {
            return Err(syntax(
                text,
                format!("'{name}' takes 1 to 3 numbers, got {}", numbers.len()),
            ));
        }
    };
    if let Some((lo, hi)) = bounds {
        if lo > hi {
            return Err(syntax(text, format!("'{name}' has min {lo} above max {hi}")));
        }
    }
    Ok(ParameterSpec {
        name: name.to_string(),
        value,
        bounds,
    })
}

/// Parse one argument, emitting inline parameter definitions into `out`.
fn parse_arg(text: &str, arg: &str, out: &mut Vec<Instruction>) -> Result<Arg, CompositionError> {
    if arg.starts_with('{') {
        let mut names = Vec::new();
        for item in split_group(text, arg)? {
            names.push(parse_name_or_parameter(text, item, out)?);
        }
        return Ok(Arg::List(names));
    }
    parse_name_or_parameter(text, arg, out).map(Arg::Name)
}

fn parse_name_or_parameter(
    text: &str,
    item: &str,
    out: &mut Vec<Instruction>,
) -> Result<String, CompositionError> {
    if item.contains('[') {
        let param = parse_parameter(text, item)?;
        let name = param.name.clone();
        out.push(Instruction::Parameter(param));
        Ok(name)
    } else {
        check_identifier(text, item)?;
        Ok(item.to_string())
    }
}

fn parse_shape(
    text: &str,
    trimmed: &str,
    out: &mut Vec<Instruction>,
) -> Result<ShapeSpec, CompositionError> {
    let (kind, rest) = trimmed
        .split_once("::")
        .ok_or_else(|| syntax(text, "expected 'Kind::name(...)'"))?;
    let kind = kind.trim();
    let open = rest
        .find('(')
        .ok_or_else(|| syntax(text, "expected '(' after the shape name"))?;
    let name = rest[..open].trim();
    check_identifier(text, name)?;
    let body = rest[open + 1..]
        .trim_end()
        .strip_suffix(')')
        .ok_or_else(|| syntax(text, "expected ')' at the end"))?;

    let raw_args = split_top_level(text, body)?;
    let Some((observable, raw_args)) = raw_args.split_first() else {
        return Err(syntax(text, "missing observable argument"));
    };
    check_identifier(text, observable)?;

    // HistPdf takes an integer order that is not a name.
    if kind == "HistPdf" {
        let [data, order] = raw_args else {
            return Err(syntax(text, "HistPdf takes (x, histogram, order)"));
        };
        check_identifier(text, data)?;
        let order = order
            .parse::<usize>()
            .map_err(|_| syntax(text, format!("'{order}' is not an interpolation order")))?;
        return Ok(ShapeSpec {
            name: name.to_string(),
            observable: observable.to_string(),
            kind: ShapeSpecKind::Histogram {
                data: data.to_string(),
                order,
            },
        });
    }

    let mut args = Vec::with_capacity(raw_args.len());
    for arg in raw_args.iter().filter(|a| !a.is_empty()) {
        args.push(parse_arg(text, arg, out)?);
    }
    let kind = shape_kind(text, kind, args)?;
    Ok(ShapeSpec {
        name: name.to_string(),
        observable: observable.to_string(),
        kind,
    })
}

fn shape_kind(text: &str, kind: &str, args: Vec<Arg>) -> Result<ShapeSpecKind, CompositionError> {
    let arity = |expected: &str| syntax(text, format!("{kind} takes (x, {expected})"));
    let mut names = Vec::new();
    let mut list = None;
    for arg in args {
        match arg {
            Arg::Name(n) => names.push(n),
            Arg::List(l) if list.is_none() => list = Some(l),
            Arg::List(_) => return Err(syntax(text, "only one coefficient list is allowed")),
        }
    }

    let spec = match kind {
        "Gaussian" | "RooGaussian" => match (names.as_slice(), list) {
            ([mean, sigma], None) => ShapeSpecKind::Gaussian {
                mean: mean.clone(),
                sigma: sigma.clone(),
            },
            _ => return Err(arity("mean, sigma")),
        },
        "RooCBExGaussShape" | "CBExGauss" => match (names.as_slice(), list) {
            ([mean, sigma, alpha, n, sigma2, sos], None) => ShapeSpecKind::CrystalBallGauss {
                mean: mean.clone(),
                sigma: sigma.clone(),
                alpha: alpha.clone(),
                n: n.clone(),
                sigma2: sigma2.clone(),
                sos: sos.clone(),
            },
            _ => return Err(arity("mean, sigma, alpha, n, sigma_2, sos")),
        },
        "Chebychev" | "RooChebychev" => match (names.is_empty(), list) {
            (true, Some(coefficients)) => ShapeSpecKind::Chebychev { coefficients },
            _ => return Err(arity("{coefficients}")),
        },
        "Polynomial" | "RooPolynomial" => match (names.is_empty(), list) {
            (true, coefficients) => ShapeSpecKind::Polynomial {
                coefficients: coefficients.unwrap_or_default(),
            },
            _ => return Err(arity("{coefficients}")),
        },
        "Exponential" | "RooExponential" => match (names.as_slice(), list) {
            ([slope], None) => ShapeSpecKind::Exponential {
                slope: slope.clone(),
            },
            _ => return Err(arity("slope")),
        },
        "RooCMSShape" | "CMSShape" => match (names.as_slice(), list) {
            ([alpha, beta, gamma, peak], None) => ShapeSpecKind::CmsShape {
                alpha: alpha.clone(),
                beta: beta.clone(),
                gamma: gamma.clone(),
                peak: peak.clone(),
            },
            _ => return Err(arity("alpha, beta, gamma, peak")),
        },
        "FCONV" => match (names.as_slice(), list) {
            ([physics, resolution], None) => ShapeSpecKind::Convolution {
                physics: physics.clone(),
                resolution: resolution.clone(),
            },
            _ => return Err(arity("physics, resolution")),
        },
        other => return Err(syntax(text, format!("unknown shape kind '{other}'"))),
    };
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(name: &str, value: f64, bounds: Option<(f64, f64)>) -> Instruction {
        Instruction::Parameter(ParameterSpec {
            name: name.to_string(),
            value,
            bounds,
        })
    }

    #[test]
    fn parses_parameter_forms() {
        assert_eq!(parse_spec("peakP[90.0]").unwrap(), vec![param("peakP", 90.0, None)]);
        assert_eq!(
            parse_spec("meanP[-0.0,-5.0,5.0]").unwrap(),
            vec![param("meanP", 0.0, Some((-5.0, 5.0)))]
        );
        assert_eq!(
            parse_spec(" acmsP[50., 80.] ").unwrap(),
            vec![param("acmsP", 65.0, Some((50.0, 80.0)))]
        );
    }

    #[test]
    fn parses_parameter_groups() {
        let out = parse_spec("{a0[0.25,-1,1],a1[-0.1,-1,1]}").unwrap();
        assert_eq!(
            out,
            vec![
                param("a0", 0.25, Some((-1.0, 1.0))),
                param("a1", -0.1, Some((-1.0, 1.0))),
            ]
        );
    }

    #[test]
    fn parses_shapes_with_named_arguments() {
        let out = parse_spec("RooCMSShape::bkgPass(x, acmsP, betaP, gammaP, peakP)").unwrap();
        let [Instruction::Shape(shape)] = out.as_slice() else {
            panic!("expected one shape, got {out:?}");
        };
        assert_eq!(shape.name, "bkgPass");
        assert_eq!(shape.observable, "x");
        assert!(matches!(&shape.kind, ShapeSpecKind::CmsShape { peak, .. } if peak == "peakP"));
    }

    #[test]
    fn inline_parameters_come_before_their_shape() {
        let out = parse_spec("Chebychev::bkgFail(x, {a0[0.3,-1,1], a1})").unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], param("a0", 0.3, Some((-1.0, 1.0))));
        let Instruction::Shape(shape) = &out[1] else {
            panic!("expected a shape");
        };
        assert_eq!(
            shape.kind,
            ShapeSpecKind::Chebychev {
                coefficients: vec!["a0".to_string(), "a1".to_string()]
            }
        );
    }

    #[test]
    fn histogram_and_convolution_shapes() {
        let out = parse_spec("HistPdf::sigPhysPass(x, hGenZPass, 3)").unwrap();
        assert!(matches!(
            &out[0],
            Instruction::Shape(ShapeSpec { kind: ShapeSpecKind::Histogram { order: 3, .. }, .. })
        ));
        let out = parse_spec("FCONV::sigPass(x, sigPhysPass, sigResPass)").unwrap();
        assert!(matches!(
            &out[0],
            Instruction::Shape(ShapeSpec { kind: ShapeSpecKind::Convolution { .. }, .. })
        ));
        let flat = parse_spec("Polynomial::bkgPass(x)").unwrap();
        assert!(matches!(
            &flat[0],
            Instruction::Shape(ShapeSpec { kind: ShapeSpecKind::Polynomial { coefficients }, .. })
                if coefficients.is_empty()
        ));
    }

    #[test]
    fn syntax_errors_carry_the_text() {
        for bad in [
            "meanP[1,2",
            "meanP[a,b]",
            "meanP[1,2,3,4]",
            "Gaussian::g(x, m)",
            "Bogus::g(x, m)",
            "Gaussian::g(x, m, s",
            "2bad[1]",
            "{}",
        ] {
            match parse_spec(bad) {
                Err(CompositionError::Syntax { text, .. }) => assert_eq!(text, bad),
                other => panic!("{bad}: expected a syntax error, got {other:?}"),
            }
        }
    }

    #[test]
    fn parses_a_specification_list_in_order() {
        let lines = ["meanP[0,-5,5]", "sigmaP[1,0.5,5]", "Gaussian::sigResPass(x, meanP, sigmaP)"];
        let out = parse_specs(&lines).unwrap();
        assert_eq!(out.len(), 3);
        assert!(matches!(out[2], Instruction::Shape(_)));
    }
}
