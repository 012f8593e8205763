//! Query arrival workloads.

use std::path::Path;

use rand::prelude::*;
use rand_pcg::Pcg64;

use crate::error::{read_file, Error, Result};
use crate::frequency::{millis_to_micros, Time};
use crate::predictor::{CostPredictor, QueryId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Arrival {
    pub time: Time,
    /// Query to submit, drawn at random when not given by the trace.
    pub query: Option<QueryId>,
}

/// Parses an arrival trace with one `<time ms> [query id]` entry per line.
pub fn parse_arrivals(text: &str, source: &str) -> Result<Vec<Arrival>> {
    let mut arrivals = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let (time, query) = match tokens.as_slice() {
            [] => continue,
            [time] => (*time, None),
            [time, query] => (*time, Some(*query)),
            _ => return Err(Error::parse(source, i + 1, "expected '<time ms> [query id]'")),
        };
        let time = time
            .parse::<f64>()
            .map_err(|_| Error::parse(source, i + 1, format!("invalid time '{}'", time)))?;
        let query = match query {
            Some(q) => Some(
                q.parse::<QueryId>()
                    .map_err(|_| Error::parse(source, i + 1, format!("invalid query id '{}'", q)))?,
            ),
            None => None,
        };
        arrivals.push(Arrival {
            time: millis_to_micros(time),
            query,
        });
    }
    Ok(arrivals)
}

pub fn load_arrivals<P: AsRef<Path>>(path: P) -> Result<Vec<Arrival>> {
    let path = path.as_ref();
    parse_arrivals(&read_file(path)?, &path.display().to_string())
}

/// Draws query ids uniformly from a fixed population.
pub struct QueryPicker {
    ids: Vec<QueryId>,
    rand: Pcg64,
}

impl QueryPicker {
    pub fn new(ids: Vec<QueryId>, seed: u64) -> Self {
        assert!(!ids.is_empty(), "no queries to pick from");
        Self {
            ids,
            rand: Pcg64::seed_from_u64(seed),
        }
    }

    pub fn next_query(&mut self) -> QueryId {
        self.ids[self.rand.gen_range(0..self.ids.len())]
    }
}

/// Resolves an arrival trace into `(time, query)` pairs.
///
/// Entries without a query id get a random one known to `predictor`. At most `limit` arrivals are kept.
pub fn build_workload(
    arrivals: &[Arrival],
    predictor: &CostPredictor,
    limit: Option<usize>,
    seed: u64,
) -> Result<Vec<(Time, QueryId)>> {
    let mut picker = QueryPicker::new(predictor.query_ids(), seed);
    let limit = limit.unwrap_or(arrivals.len());
    let mut workload = Vec::with_capacity(limit.min(arrivals.len()));
    for arrival in arrivals.iter().take(limit) {
        let query = match arrival.query {
            Some(query) if predictor.contains(query) => query,
            Some(query) => return Err(Error::UnknownQuery(query)),
            None => picker.next_query(),
        };
        workload.push((arrival.time, query));
    }
    Ok(workload)
}
