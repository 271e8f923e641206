use std::future::Future;

use futures::{pin_mut, Stream, StreamExt};

use super::{subject::Phase, BehaviorSubject, ErrorEvent, SubjectError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOptions {
    /// Stop consuming the source after forwarding its first error.
    pub cancel_on_error: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        IngestOptions {
            cancel_on_error: true,
        }
    }
}

/// Exclusive publish rights for one ingestion. Released on drop.
struct IngestGuard<T, E> {
    subject: BehaviorSubject<T, E>,
}

impl<T, E> IngestGuard<T, E>
where
    T: Clone,
    E: Clone,
{
    fn acquire(subject: &BehaviorSubject<T, E>) -> Result<Self, SubjectError> {
        {
            let mut core = subject.lock();

            core.check_idle("ingest")?;
            core.phase = Phase::Ingesting;
        }

        log::debug!("ingestion started");

        Ok(IngestGuard {
            subject: subject.clone(),
        })
    }
}

impl<T, E> Drop for IngestGuard<T, E> {
    fn drop(&mut self) {
        let mut core = self.subject.lock();

        if core.phase == Phase::Ingesting {
            core.phase = Phase::Idle;
        }

        log::debug!("ingestion finished");
    }
}

impl<T, E> BehaviorSubject<T, E>
where
    T: Clone,
    E: Clone,
{
    /// Forward every event of `source` into this subject, stopping at the
    /// first error.
    ///
    /// See [`BehaviorSubject::ingest_with`].
    pub fn ingest<S>(
        &self,
        source: S,
    ) -> Result<impl Future<Output = Result<(), E>>, SubjectError>
    where
        S: Stream<Item = Result<T, E>>,
    {
        self.ingest_with(source, IngestOptions::default())
    }

    /// Forward every event of `source` into this subject.
    ///
    /// Exclusive publish rights are taken immediately; the source is consumed
    /// when the returned future is polled. Until that future resolves or is
    /// dropped, direct publishing and `close` fail with
    /// `IllegalState::IngestionInProgress`.
    ///
    /// The future resolves to `Ok` when the source ends, or to the source's
    /// error when `cancel_on_error` is set. The subject is never closed by an
    /// ingestion.
    pub fn ingest_with<S>(
        &self,
        source: S,
        options: IngestOptions,
    ) -> Result<impl Future<Output = Result<(), E>>, SubjectError>
    where
        S: Stream<Item = Result<T, E>>,
    {
        let guard = IngestGuard::acquire(self)?;

        Ok(async move {
            pin_mut!(source);

            while let Some(event) = source.next().await {
                match event {
                    Ok(value) => guard.subject.lock().publish_value(value),
                    Err(error) => {
                        guard
                            .subject
                            .lock()
                            .publish_error(ErrorEvent::new(error.clone()));

                        if options.cancel_on_error {
                            log::debug!("ingestion cancelled on source error");
                            return Err(error);
                        }
                    }
                }
            }

            Ok(())
        })
    }
}
