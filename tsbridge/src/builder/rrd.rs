//! RRDtool `xport` lowering.
//!
//! `xport` evaluates named virtual data sources on a stack machine: `DEF`
//! binds a file's data source, `CDEF`/`VDEF` compute from earlier names and
//! `XPORT` selects what is returned. Names must be defined before use, so the
//! argument list is always flags, DEFs, CDEF/VDEFs, XPORTs.

use std::sync::Arc;

use tracing::{debug, instrument, trace};

use super::{format_number, QueryBuilder};
use crate::error::{Result, TsdbError};
use crate::format::rrd::ds_name;
use crate::query::{AggregateFunction, Aggregation, Query, RrdRawQuery, RrdToken, DEFAULT_FIELD};
use crate::rrd::TagStrategy;

/// Consolidation function read from the archives.
const CONSOLIDATION: &str = "AVERAGE";

const FIRST_DEF: u32 = 1;
const FIRST_AGGREGATION: u32 = 1000;
const FIRST_MATH: u32 = 2000;

/// Hands out virtual data source names from disjoint ranges: `v1, v2, ...`
/// for DEFs, `agg1000, ...` for aggregations and `math2000, ...` for math
/// expressions.
#[derive(Debug, Clone)]
pub struct VarAllocator {
    next_def: u32,
    next_aggregation: u32,
    next_math: u32,
}

impl Default for VarAllocator {
    fn default() -> Self {
        Self {
            next_def: FIRST_DEF,
            next_aggregation: FIRST_AGGREGATION,
            next_math: FIRST_MATH,
        }
    }
}

impl VarAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn def(&mut self) -> String {
        let name = format!("v{}", self.next_def);
        self.next_def += 1;
        name
    }

    pub fn aggregation(&mut self) -> String {
        let name = format!("agg{}", self.next_aggregation);
        self.next_aggregation += 1;
        name
    }

    pub fn math(&mut self) -> String {
        let name = format!("math{}", self.next_math);
        self.next_math += 1;
        name
    }
}

struct Def {
    name: String,
    field: String,
    consumed: bool,
}

/// Builds `xport` invocations against files found by a [`TagStrategy`].
#[derive(Debug, Clone)]
pub struct RrdQueryBuilder {
    strategy: Arc<dyn TagStrategy>,
}

impl RrdQueryBuilder {
    pub fn new(strategy: Arc<dyn TagStrategy>) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> &Arc<dyn TagStrategy> {
        &self.strategy
    }

    fn time_args(&self, query: &Query, args: &mut Vec<RrdToken>) -> Result<()> {
        if let Some(start) = query.start_time() {
            args.push(RrdToken::Arg("--start".into()));
            args.push(RrdToken::Arg(start.timestamp().to_string()));
            if let Some(end) = query.end_time() {
                args.push(RrdToken::Arg("--end".into()));
                args.push(RrdToken::Arg(end.timestamp().to_string()));
            }
        } else if let Some(window) = query.effective_window()? {
            args.push(RrdToken::Arg("--start".into()));
            args.push(RrdToken::Arg(window.rrd()));
        }
        if let Some(interval) = query.interval()? {
            args.push(RrdToken::Arg("--step".into()));
            args.push(RrdToken::Arg(interval.as_secs().to_string()));
        }
        Ok(())
    }
}

impl QueryBuilder for RrdQueryBuilder {
    type Raw = RrdRawQuery;

    #[instrument(skip(self, query), fields(measurement = %query.measurement()))]
    fn build(&self, query: &Query) -> Result<RrdRawQuery> {
        query.validate()?;

        let paths = self
            .strategy
            .resolve_file_paths(query.measurement(), query.conditions())?;
        let Some(path) = paths.first() else {
            return Err(TsdbError::tag_resolution(format!(
                "no RRD file matches measurement '{}' and its conditions",
                query.measurement()
            )));
        };
        if paths.len() > 1 {
            debug!(
                matches = paths.len(),
                path = %path.display(),
                "several RRD files match, using the first"
            );
        }
        let path = escape_colons(&path.to_string_lossy());

        let mut vars = VarAllocator::new();
        let mut args = vec![RrdToken::Arg("--json".into())];
        self.time_args(query, &mut args)?;

        let explicit = query.explicit_fields();
        let fields = if explicit.is_empty() {
            vec![DEFAULT_FIELD]
        } else {
            explicit
        };
        let mut defs: Vec<Def> = fields
            .iter()
            .map(|field| Def {
                name: vars.def(),
                field: field.to_string(),
                consumed: false,
            })
            .collect();
        for def in &defs {
            args.push(RrdToken::Def(format!(
                "{}={path}:{}:{CONSOLIDATION}",
                def.name,
                ds_name(&def.field)
            )));
        }

        let default_field = query.default_field();
        let mut exports = Vec::new();
        for aggregation in query.aggregations() {
            let name = vars.aggregation();
            args.push(aggregate(&name, aggregation, &mut defs, default_field)?);
            exports.push(format!("{name}:{}", aggregation.output_name(default_field)));
        }

        if let Some(math) = query.math_expression() {
            let name = vars.math();
            args.push(RrdToken::Cdef(format!("{name}={}", math.expression)));
            exports.push(format!("{name}:{}", math.alias));
        }

        let mut xports: Vec<RrdToken> = defs
            .iter()
            .filter(|d| !d.consumed)
            .map(|d| RrdToken::Xport(format!("{}:{}", d.name, d.field)))
            .collect();
        xports.extend(exports.into_iter().map(RrdToken::Xport));
        args.extend(xports);

        if !query.group_by_tags().is_empty()
            || !query.order().is_empty()
            || query.get_limit().is_some()
            || query.get_offset().is_some()
            || query.distinct_fields().is_some()
            || query.get_timezone().is_some()
        {
            trace!("xport ignores grouping, ordering, limit, offset, distinct and timezone");
        }

        let raw = RrdRawQuery::new("xport", None, args)?;
        debug!("Generated rrdtool command: {}", raw.command_line());
        Ok(raw)
    }
}

/// One CDEF or VDEF for `aggregation`, marking the DEFs it consumes.
fn aggregate(
    name: &str,
    aggregation: &Aggregation,
    defs: &mut [Def],
    default_field: &str,
) -> Result<RrdToken> {
    let field = aggregation.field_or(default_field);
    let source = match defs.iter().position(|d| d.field == field) {
        Some(index) => index,
        None => {
            debug!(
                field,
                fallback = defs.first().map_or("", |d| d.field.as_str()),
                "aggregated field is not selected, using the first data source"
            );
            0
        }
    };

    let token = match aggregation.function {
        AggregateFunction::Avg => {
            // Pairwise average only; a general mean needs a product decision
            // on how to weight unknown values.
            if defs.len() != 2 {
                return Err(TsdbError::configuration(format!(
                    "rrdtool average needs exactly two data sources, got {}",
                    defs.len()
                )));
            }
            mark_all(defs);
            RrdToken::Cdef(format!("{name}={},{},+,2,/", defs[0].name, defs[1].name))
        }
        AggregateFunction::Max => fold_or_vdef(name, defs, source, "MAX", "MAXIMUM"),
        AggregateFunction::Min => fold_or_vdef(name, defs, source, "MIN", "MINIMUM"),
        AggregateFunction::Sum => fold_or_vdef(name, defs, source, "+", "TOTAL"),
        AggregateFunction::Stddev => {
            defs[source].consumed = true;
            RrdToken::Vdef(format!("{name}={},STDEV", defs[source].name))
        }
        AggregateFunction::Percentile(_) => {
            let rank = aggregation.function.percentile_rank()?.unwrap_or_default();
            defs[source].consumed = true;
            RrdToken::Vdef(format!(
                "{name}={},{},PERCENT",
                defs[source].name,
                format_number(rank)
            ))
        }
        AggregateFunction::Count => {
            return Err(TsdbError::configuration(
                "rrdtool xport has no count aggregation",
            ));
        }
    };
    Ok(token)
}

/// `v1,v2,OP,v3,OP` across every DEF, or a VDEF over the single source.
fn fold_or_vdef(name: &str, defs: &mut [Def], source: usize, op: &str, vdef: &str) -> RrdToken {
    if defs.len() < 2 {
        defs[source].consumed = true;
        return RrdToken::Vdef(format!("{name}={},{vdef}", defs[source].name));
    }
    let mut expr = format!("{},{},{op}", defs[0].name, defs[1].name);
    for def in &defs[2..] {
        expr.push_str(&format!(",{},{op}", def.name));
    }
    mark_all(defs);
    RrdToken::Cdef(format!("{name}={expr}"))
}

fn mark_all(defs: &mut [Def]) {
    for def in defs {
        def.consumed = true;
    }
}

/// rrdtool splits DEF arguments on `:`.
fn escape_colons(path: &str) -> String {
    path.replace(':', "\\:")
}
