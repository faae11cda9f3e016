//! Two-instrument survey flow.
//!
//! One question is shown at a time from the selected instrument. Finishing an
//! instrument moves on to the other one while it is incomplete; submission
//! opens once every question of both instruments has an answer.

use std::collections::BTreeMap;
use std::sync::mpsc::Receiver;

use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::error::{AppResult, SurveyError};
use crate::model::{total_score, DayAnswers, Instrument, InstrumentKind};
use crate::scoring::{option_badge, score_answers, unscored_options};
use crate::session::{Session, SessionStore};
use crate::store::{Document, DocumentStore, Query, Subscription};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptionView {
    pub badge: usize,
    pub text: String,
    pub checked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressView {
    pub kind: InstrumentKind,
    pub label: &'static str,
    pub answered: usize,
    pub total: usize,
    pub complete: bool,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SurveyView {
    pub selected: InstrumentKind,
    pub title: String,
    pub number: String,
    pub question: String,
    pub options: Vec<OptionView>,
    pub progress: Vec<ProgressView>,
    pub can_next: bool,
    pub can_submit: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmitReceipt {
    pub user: String,
    pub date: String,
    pub totals: BTreeMap<String, i64>,
}

#[derive(Debug, Clone)]
pub struct SurveyRunner {
    instruments: BTreeMap<InstrumentKind, Instrument>,
    selected: InstrumentKind,
    index: usize,
    answers: BTreeMap<InstrumentKind, BTreeMap<usize, String>>,
    lenient: bool,
}

impl SurveyRunner {
    pub fn new(mental: Instrument, physical: Instrument) -> Result<Self, SurveyError> {
        if mental.is_empty() || physical.is_empty() {
            return Err(SurveyError::NoInstruments);
        }
        let mut instruments = BTreeMap::new();
        instruments.insert(InstrumentKind::MentalHealth, mental);
        instruments.insert(InstrumentKind::PhysicalHealth, physical);
        Ok(Self {
            instruments,
            selected: InstrumentKind::MentalHealth,
            index: 0,
            answers: BTreeMap::new(),
            lenient: false,
        })
    }

    /// Accept answers missing from the score tables, scoring them at the top
    /// of the scale.
    pub fn with_lenient_scoring(mut self, lenient: bool) -> Self {
        self.lenient = lenient;
        self
    }

    pub fn selected(&self) -> InstrumentKind {
        self.selected
    }

    pub fn index(&self) -> usize {
        self.index
    }

    fn instrument(&self, kind: InstrumentKind) -> &Instrument {
        &self.instruments[&kind]
    }

    pub fn answered(&self, kind: InstrumentKind) -> usize {
        self.answers.get(&kind).map(|a| a.len()).unwrap_or(0)
    }

    pub fn is_complete(&self, kind: InstrumentKind) -> bool {
        self.answered(kind) == self.instrument(kind).len()
    }

    pub fn all_complete(&self) -> bool {
        InstrumentKind::ALL.iter().all(|kind| self.is_complete(*kind))
    }

    pub fn current_answer(&self) -> Option<&str> {
        self.answers
            .get(&self.selected)
            .and_then(|a| a.get(&self.index))
            .map(|a| a.as_str())
    }

    pub fn choose(&mut self, option: &str) -> Result<(), SurveyError> {
        let question = &self.instrument(self.selected).questions[self.index];
        if !question.options.iter().any(|candidate| candidate == option) {
            return Err(SurveyError::UnknownOption {
                option: option.to_string(),
            });
        }
        self.answers
            .entry(self.selected)
            .or_default()
            .insert(self.index, option.to_string());
        Ok(())
    }

    pub fn next(&mut self) -> Result<(), SurveyError> {
        if self.current_answer().is_none() {
            return Err(SurveyError::Unanswered);
        }
        if self.all_complete() {
            return Err(SurveyError::LastQuestion);
        }
        if self.index + 1 < self.instrument(self.selected).len() {
            self.index += 1;
            return Ok(());
        }
        let other = self.selected.other();
        if self.is_complete(other) {
            return Err(SurveyError::LastQuestion);
        }
        self.selected = other;
        self.index = 0;
        Ok(())
    }

    pub fn select(&mut self, kind: InstrumentKind) -> Result<(), SurveyError> {
        if self.is_complete(kind) {
            return Err(SurveyError::AlreadyComplete);
        }
        self.selected = kind;
        self.index = 0;
        Ok(())
    }

    /// Swaps in a changed instrument. Answers past the new question count are
    /// dropped, as are answers no longer among a question's options.
    pub fn replace_instrument(&mut self, instrument: Instrument) {
        if instrument.is_empty() {
            return;
        }
        let kind = instrument.kind;
        if let Some(answers) = self.answers.get_mut(&kind) {
            answers.retain(|index, answer| {
                instrument
                    .questions
                    .get(*index)
                    .is_some_and(|q| q.options.iter().any(|o| *o == *answer))
            });
        }
        if kind == self.selected && self.index >= instrument.len() {
            self.index = 0;
        }
        self.instruments.insert(kind, instrument);
    }

    pub fn view(&self) -> SurveyView {
        let instrument = self.instrument(self.selected);
        let question = &instrument.questions[self.index];
        let current = self.current_answer();
        let options = question
            .options
            .iter()
            .enumerate()
            .map(|(i, text)| OptionView {
                badge: option_badge(self.selected, i),
                text: text.clone(),
                checked: current == Some(text.as_str()),
            })
            .collect();
        let progress = InstrumentKind::ALL
            .iter()
            .map(|kind| {
                let answered = self.answered(*kind);
                let total = self.instrument(*kind).len();
                let complete = self.is_complete(*kind);
                ProgressView {
                    kind: *kind,
                    label: kind.label(),
                    answered,
                    total,
                    complete,
                    text: if complete {
                        " (완료)".to_string()
                    } else {
                        format!("({answered}/{total})")
                    },
                }
            })
            .collect();
        SurveyView {
            selected: self.selected,
            title: format!("{} 테스트", instrument.name),
            number: format!("Q{}. ", self.index + 1),
            question: question.question.clone(),
            options,
            progress,
            can_next: current.is_some() && !self.all_complete(),
            can_submit: self.all_complete() && self.scored(self.lenient).is_ok(),
        }
    }

    /// Scores keyed the way they are stored: instrument id, then question
    /// index.
    pub fn scored(&self, lenient: bool) -> AppResult<DayAnswers> {
        let mut out = DayAnswers::new();
        for (kind, answers) in &self.answers {
            let scores = score_answers(*kind, answers, lenient)?;
            out.insert(self.instrument(*kind).id.clone(), scores);
        }
        Ok(out)
    }

    /// Writes today's answer set, replacing any earlier submission for the
    /// same date, then ends the session.
    pub fn submit(
        &self,
        store: &DocumentStore,
        sessions: &SessionStore,
        config: &AppConfig,
        session: &Session,
        today: &str,
    ) -> AppResult<SubmitReceipt> {
        if session.user.is_empty() {
            return Err(SurveyError::NoSession.into());
        }
        if !self.all_complete() {
            return Err(SurveyError::Incomplete.into());
        }
        let day = self.scored(self.lenient || config.lenient_scoring)?;
        let path = config.user_path(session.user.as_str());
        store.update(path.as_str(), &["answers", today], json!(day))?;
        sessions.clear()?;

        let totals = day
            .iter()
            .map(|(id, scores)| (id.clone(), total_score(scores)))
            .collect();
        info!(user = session.user.as_str(), date = today, "answers submitted");
        Ok(SubmitReceipt {
            user: session.user.clone(),
            date: today.to_string(),
            totals,
        })
    }
}

/// Live instrument documents, one subscription per kind.
pub struct InstrumentFeed {
    subscriptions: Vec<(InstrumentKind, Subscription)>,
    current: BTreeMap<InstrumentKind, Instrument>,
}

impl InstrumentFeed {
    pub fn open(store: &DocumentStore, config: &AppConfig) -> AppResult<Self> {
        let mut subscriptions = Vec::new();
        for kind in InstrumentKind::ALL {
            let query = Query::field_eq(config.root_collection.as_str(), "test_type", kind.tag());
            subscriptions.push((kind, store.subscribe(query)?));
        }
        let mut feed = Self {
            subscriptions,
            current: BTreeMap::new(),
        };
        feed.refresh();
        Ok(feed)
    }

    /// Applies pending snapshots; returns the kinds that changed.
    pub fn refresh(&mut self) -> Vec<InstrumentKind> {
        let mut changed = Vec::new();
        for (kind, subscription) in &self.subscriptions {
            let Some(snapshot) = subscription.latest() else {
                continue;
            };
            match first_instrument(&snapshot) {
                Some(instrument) => {
                    if self.current.get(kind) != Some(&instrument) {
                        self.current.insert(*kind, instrument);
                        changed.push(*kind);
                    }
                }
                None => {
                    if self.current.remove(kind).is_some() {
                        changed.push(*kind);
                    }
                }
            }
        }
        changed
    }

    pub fn get(&self, kind: InstrumentKind) -> Option<&Instrument> {
        self.current.get(&kind)
    }

    /// Extra receivers on the feed's own subscriptions, one per kind.
    pub fn taps(&self) -> AppResult<Vec<(InstrumentKind, Receiver<Vec<Document>>)>> {
        self.subscriptions
            .iter()
            .map(|(kind, subscription)| Ok((*kind, subscription.tap()?)))
            .collect()
    }
}

fn first_instrument(snapshot: &[Document]) -> Option<Instrument> {
    snapshot.iter().find_map(Instrument::from_document)
}

/// Survey runner kept in step with the instrument feed.
pub struct LiveSurvey {
    feed: InstrumentFeed,
    runner: Option<SurveyRunner>,
    lenient: bool,
}

impl LiveSurvey {
    pub fn open(store: &DocumentStore, config: &AppConfig) -> AppResult<Self> {
        Ok(Self {
            feed: InstrumentFeed::open(store, config)?,
            runner: None,
            lenient: config.lenient_scoring,
        })
    }

    pub fn feed(&self) -> &InstrumentFeed {
        &self.feed
    }

    /// The runner over the current instruments. Without lenient scoring an
    /// instrument offering an option that has no score is refused, and any
    /// answers collected so far are dropped.
    pub fn runner(&mut self) -> Result<&mut SurveyRunner, SurveyError> {
        let changed = self.feed.refresh();
        if !self.lenient {
            let unscored: Vec<String> = InstrumentKind::ALL
                .iter()
                .filter_map(|kind| self.feed.get(*kind))
                .flat_map(unscored_options)
                .collect();
            if !unscored.is_empty() {
                let options = unscored.join(", ");
                warn!(options = options.as_str(), "instrument offers unscored options");
                self.runner = None;
                return Err(SurveyError::UnscoredOptions { options });
            }
        }
        if self.runner.is_none() {
            let mental = self.feed.get(InstrumentKind::MentalHealth).cloned();
            let physical = self.feed.get(InstrumentKind::PhysicalHealth).cloned();
            let (Some(mental), Some(physical)) = (mental, physical) else {
                return Err(SurveyError::NoInstruments);
            };
            self.runner = Some(SurveyRunner::new(mental, physical)?.with_lenient_scoring(self.lenient));
        } else if let Some(runner) = self.runner.as_mut() {
            for kind in changed {
                if let Some(instrument) = self.feed.get(kind) {
                    runner.replace_instrument(instrument.clone());
                }
            }
        }
        self.runner.as_mut().ok_or(SurveyError::NoInstruments)
    }

    /// Drops collected answers, keeping the subscriptions.
    pub fn reset(&mut self) {
        self.runner = None;
    }
}
