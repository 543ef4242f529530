//! Location resolution.
//!
//! The resolver maps identifiers against a routine's source text and line table.
//! Candidate lines found in the anchor's text are checked against the anchor and
//! every routine nested inside it, since a line written in the outer source may be
//! executed by an inner routine (a lambda body, a nested function). Only lines the
//! owning routine reports as instrumentable survive.
//!
//! Results are cached per `(routine, identifier)`; routines are immutable for the
//! resolver's purposes. [`Resolver::clear`] drops everything.

use crate::{
    error::ResolutionError,
    host::{EventKind, Namespace, RoutineId, RoutineRef},
    identifier::Identifier,
};
use dashmap::DashMap;
use rustc_hash::FxHashSet;
use std::{collections::BTreeSet, fmt, sync::Arc};

/// Number of hex digits kept from a source digest.
pub const SOURCE_HASH_LEN: usize = 16;

/// What a trigger is anchored on.
#[derive(Debug, Clone)]
pub enum Anchor {
    /// A single routine and everything nested in it.
    Routine(RoutineRef),
    /// Every routine statically declared on a module or class.
    Namespace(Arc<dyn Namespace>),
    /// No routine: locations are matched against whichever routine is running.
    Global,
}

impl Anchor {
    /// Anchors on a routine.
    pub fn routine(routine: RoutineRef) -> Self {
        Self::Routine(routine)
    }

    /// Anchors on a namespace.
    pub fn namespace(namespace: Arc<dyn Namespace>) -> Self {
        Self::Namespace(namespace)
    }

    /// Returns `true` for [`Anchor::Global`].
    #[must_use]
    pub const fn is_global(&self) -> bool {
        matches!(self, Self::Global)
    }

    /// Name used in messages.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Routine(r) => r.name(),
            Self::Namespace(ns) => ns.name(),
            Self::Global => "<global>",
        }
    }

    fn source_lines(&self) -> Option<Arc<[String]>> {
        match self {
            Self::Routine(r) => r.source_lines(),
            Self::Namespace(ns) => ns.source_lines(),
            Self::Global => None,
        }
    }

    fn first_line(&self) -> u32 {
        match self {
            Self::Routine(r) => r.first_line(),
            Self::Namespace(ns) => ns.first_line(),
            Self::Global => 0,
        }
    }

    /// Routines the anchor expands to. Empty for the global anchor.
    #[must_use]
    pub fn routines(&self) -> Vec<RoutineRef> {
        match self {
            Self::Routine(r) => vec![Arc::clone(r)],
            Self::Namespace(ns) => ns.members(),
            Self::Global => Vec::new(),
        }
    }
}

impl From<RoutineRef> for Anchor {
    fn from(routine: RoutineRef) -> Self {
        Self::Routine(routine)
    }
}

impl From<Arc<dyn Namespace>> for Anchor {
    fn from(namespace: Arc<dyn Namespace>) -> Self {
        Self::Namespace(namespace)
    }
}

/// The location part of an [`Event`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Site {
    /// One line.
    Line(u32),
    /// Every line of the routine.
    AnyLine,
    /// A global line event, re-matched against the running routine.
    Deferred(Identifier),
    /// Start and return events carry no location.
    Routine,
}

/// A concrete, monitorable point.
#[derive(Clone)]
pub struct Event {
    /// Owning routine, `None` for global events.
    pub routine: Option<RoutineRef>,
    /// Event class.
    pub kind: EventKind,
    /// Location within the routine.
    pub site: Site,
}

impl Event {
    fn new(routine: Option<RoutineRef>, kind: EventKind, site: Site) -> Self {
        Self {
            routine,
            kind,
            site,
        }
    }

    /// Identity of the owning routine.
    #[must_use]
    pub fn routine_id(&self) -> Option<RoutineId> {
        self.routine.as_ref().map(|r| r.id())
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("routine", &self.routine.as_ref().map(|r| r.name()))
            .field("kind", &self.kind)
            .field("site", &self.site)
            .finish()
    }
}

/// Lines resolved inside one concrete routine.
#[derive(Debug, Clone)]
pub struct ResolvedLines {
    /// The routine that executes the lines.
    pub routine: RoutineRef,
    /// Sorted line numbers.
    pub lines: Vec<u32>,
}

/// Source text of a routine with leading decorators removed.
#[derive(Debug, Clone)]
pub struct RealSource {
    lines: Option<Arc<[String]>>,
    skip: usize,
    start: u32,
}

impl RealSource {
    /// Line number of the definition, after any decorators.
    #[must_use]
    pub const fn start(&self) -> u32 {
        self.start
    }

    /// `(line number, stripped text)` pairs from the definition on.
    pub fn lines(&self) -> impl Iterator<Item = (u32, &str)> + '_ {
        self.lines
            .iter()
            .flat_map(|lines| lines.iter().skip(self.skip))
            .zip(self.start..)
            .map(|(text, n)| (n, text.trim()))
    }
}

/// Resolves identifiers into events and caches the results.
#[derive(Debug, Default)]
pub struct Resolver {
    routines: DashMap<RoutineId, Arc<[RoutineRef]>>,
    lines: DashMap<(RoutineId, Identifier), Arc<[ResolvedLines]>>,
}

impl Resolver {
    /// Creates an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Source lines of `routine` with leading decorator lines skipped.
    #[must_use]
    pub fn real_source(routine: &RoutineRef) -> RealSource {
        real_source(routine.source_lines(), routine.first_line())
    }

    /// The routine followed by every routine nested in it, depth first.
    pub fn all_routines(&self, routine: &RoutineRef) -> Arc<[RoutineRef]> {
        if let Some(hit) = self.routines.get(&routine.id()) {
            return Arc::clone(&hit);
        }

        let mut seen = FxHashSet::default();
        let mut all = Vec::new();
        let mut stack = vec![Arc::clone(routine)];
        while let Some(current) = stack.pop() {
            if !seen.insert(current.id()) {
                continue;
            }
            let mut nested = current.nested();
            nested.reverse();
            stack.extend(nested);
            all.push(current);
        }

        let all: Arc<[RoutineRef]> = all.into();
        self.routines.insert(routine.id(), Arc::clone(&all));
        all
    }

    /// Resolves a line identifier against `routine` and the routines nested in it.
    ///
    /// Offsets are relative to `routine`. An empty result means no candidate line
    /// survived.
    ///
    /// # Errors
    ///
    /// The identifier contains a `<start>` or `<return>` sentinel.
    pub fn line_numbers(
        &self,
        routine: &RoutineRef,
        identifier: &Identifier,
    ) -> Result<Arc<[ResolvedLines]>, ResolutionError> {
        let key = (routine.id(), identifier.clone());
        if let Some(hit) = self.lines.get(&key) {
            return Ok(Arc::clone(&hit));
        }

        log::trace!("resolving {identifier} in `{}`", routine.name());
        let source = Self::real_source(routine);
        let agreed = candidates(&source, identifier)?;

        let mut resolved = Vec::new();
        if !agreed.is_empty() {
            for sub in self.all_routines(routine).iter() {
                let owned = sub.lines();
                let lines: Vec<u32> = agreed
                    .iter()
                    .copied()
                    .filter(|line| owned.contains(line))
                    .collect();
                if !lines.is_empty() {
                    resolved.push(ResolvedLines {
                        routine: Arc::clone(sub),
                        lines,
                    });
                }
            }
        }

        let resolved: Arc<[ResolvedLines]> = resolved.into();
        self.lines.insert(key, Arc::clone(&resolved));
        Ok(resolved)
    }

    /// First line of `routine` itself matched by `identifier`, ignoring nested routines.
    #[must_use]
    pub fn line_in(&self, routine: &RoutineRef, identifier: &Identifier) -> Option<u32> {
        let resolved = self.line_numbers(routine, identifier).ok()?;
        resolved
            .iter()
            .find(|r| r.routine.id() == routine.id())
            .and_then(|r| r.lines.first().copied())
    }

    /// Whether `line` of `routine` is one of the locations `identifier` names.
    ///
    /// This is the per-firing check behind global triggers; it goes through the same
    /// cache as static resolution.
    #[must_use]
    pub fn matches(&self, routine: &RoutineRef, line: u32, identifier: &Identifier) -> bool {
        self.line_numbers(routine, identifier).is_ok_and(|resolved| {
            resolved
                .iter()
                .find(|r| r.routine.id() == routine.id())
                .is_some_and(|r| r.lines.contains(&line))
        })
    }

    /// Rewrites relative offsets against the anchor's first real line.
    ///
    /// # Errors
    ///
    /// Offsets cannot be used with the global anchor; sentinels cannot be tuple members.
    pub fn unify(
        anchor: &Anchor,
        identifier: &Identifier,
    ) -> Result<Identifier, ResolutionError> {
        fn unify_one(start: Option<u32>, ident: &Identifier) -> Result<Identifier, ResolutionError> {
            match ident {
                Identifier::Offset(n) => {
                    let start = start.ok_or(ResolutionError::GlobalAnchor("a relative line offset"))?;
                    start
                        .checked_add(*n)
                        .map(Identifier::Line)
                        .ok_or_else(|| ResolutionError::InvalidIdentifier {
                            identifier: ident.to_string(),
                            reason: "offset runs past the last line number".to_owned(),
                        })
                }
                other => Ok(other.clone()),
            }
        }

        let start = match anchor {
            Anchor::Global => None,
            _ => Some(real_source(anchor.source_lines(), anchor.first_line()).start()),
        };

        match identifier {
            Identifier::All(members) => {
                let mut unified = Vec::with_capacity(members.len());
                for member in members {
                    match member {
                        Identifier::Start => return Err(ResolutionError::SentinelInTuple("<start>")),
                        Identifier::Return => {
                            return Err(ResolutionError::SentinelInTuple("<return>"));
                        }
                        other => unified.push(unify_one(start, other)?),
                    }
                }
                Ok(Identifier::all(unified))
            }
            single => unify_one(start, single),
        }
    }

    /// Resolves identifiers on an anchor into events.
    ///
    /// Identifiers are OR'd. With no identifiers, every line of each anchor routine
    /// is watched.
    ///
    /// # Errors
    ///
    /// An identifier resolves to nothing, or no event is produced at all.
    pub fn resolve(
        &self,
        anchor: &Anchor,
        identifiers: &[Identifier],
    ) -> Result<Vec<Event>, ResolutionError> {
        let routines = anchor.routines();
        let mut events = Vec::new();

        if identifiers.is_empty() {
            if anchor.is_global() {
                events.push(Event::new(None, EventKind::Line, Site::AnyLine));
            }
            for routine in &routines {
                events.push(Event::new(
                    Some(Arc::clone(routine)),
                    EventKind::Line,
                    Site::AnyLine,
                ));
            }
        }

        for identifier in identifiers {
            let identifier = Self::unify(anchor, identifier)?;
            let kind = match identifier {
                Identifier::Start => Some(EventKind::Start),
                Identifier::Return => Some(EventKind::Return),
                _ => None,
            };

            if let Some(kind) = kind {
                if anchor.is_global() {
                    events.push(Event::new(None, kind, Site::Routine));
                }
                for routine in &routines {
                    events.push(Event::new(Some(Arc::clone(routine)), kind, Site::Routine));
                }
                continue;
            }

            if anchor.is_global() {
                events.push(Event::new(None, EventKind::Line, Site::Deferred(identifier)));
                continue;
            }

            let before = events.len();
            for routine in &routines {
                for resolved in self.line_numbers(routine, &identifier)?.iter() {
                    for &line in &resolved.lines {
                        events.push(Event::new(
                            Some(Arc::clone(&resolved.routine)),
                            EventKind::Line,
                            Site::Line(line),
                        ));
                    }
                }
            }
            if events.len() == before {
                return Err(ResolutionError::NoMatch {
                    identifier: identifier.to_string(),
                    routine: anchor.name().to_owned(),
                });
            }
        }

        // OR'd identifiers may land on the same point; it is watched once.
        let mut seen = FxHashSet::default();
        events.retain(|e| seen.insert((e.routine_id(), e.kind, e.site.clone())));

        if events.is_empty() {
            return Err(ResolutionError::NoEvents);
        }
        Ok(events)
    }

    /// Drops every cached result.
    pub fn clear(&self) {
        self.routines.clear();
        self.lines.clear();
    }
}

/// Digest of an anchor's source text, used as a drift guard.
///
/// # Errors
///
/// The global anchor has no source.
pub fn source_hash(anchor: &Anchor) -> Result<String, ResolutionError> {
    if anchor.is_global() {
        return Err(ResolutionError::GlobalAnchor("a source hash"));
    }
    let text = anchor
        .source_lines()
        .map(|lines| lines.join("\n"))
        .unwrap_or_default();
    let mut hex = blake3::hash(text.as_bytes()).to_hex().to_string();
    hex.truncate(SOURCE_HASH_LEN);
    Ok(hex)
}

/// Fails unless `expected` is the current source hash of `anchor`.
///
/// # Errors
///
/// The hashes differ, or the anchor is global.
pub fn check_source_hash(anchor: &Anchor, expected: &str) -> Result<(), ResolutionError> {
    let found = source_hash(anchor)?;
    if found == expected {
        Ok(())
    } else {
        Err(ResolutionError::SourceHashMismatch {
            routine: anchor.name().to_owned(),
            expected: expected.to_owned(),
            found,
        })
    }
}

fn real_source(lines: Option<Arc<[String]>>, first_line: u32) -> RealSource {
    let skip = lines.as_deref().map_or(0, |lines| {
        lines
            .iter()
            .take_while(|line| line.trim_start().starts_with('@'))
            .count()
    });
    let offset = u32::try_from(skip).unwrap_or(u32::MAX);
    RealSource {
        lines,
        skip,
        start: first_line.saturating_add(offset),
    }
}

fn candidates(source: &RealSource, identifier: &Identifier) -> Result<BTreeSet<u32>, ResolutionError> {
    let mut agreed: Option<BTreeSet<u32>> = None;
    for member in identifier.members() {
        let set: BTreeSet<u32> = match member {
            Identifier::Line(n) => BTreeSet::from([*n]),
            Identifier::Offset(n) => source.start().checked_add(*n).into_iter().collect(),
            Identifier::Prefix(_) | Identifier::Pattern(_) => source
                .lines()
                .filter(|(_, text)| member.matches_text(text))
                .map(|(n, _)| n)
                .collect(),
            Identifier::All(_) => candidates(source, member)?,
            Identifier::Start => return Err(ResolutionError::SentinelInTuple("<start>")),
            Identifier::Return => return Err(ResolutionError::SentinelInTuple("<return>")),
        };
        if set.is_empty() {
            return Ok(BTreeSet::new());
        }
        agreed = Some(match agreed {
            None => set,
            Some(prev) => prev.intersection(&set).copied().collect(),
        });
    }
    Ok(agreed.unwrap_or_default())
}
