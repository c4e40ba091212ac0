// Fill Service - overwrites every byte of an array
//
// Parameters:
// - `value`: byte written, 0 when unset
// - `size`: optional new length, applied before filling

use sight_data::{Array, DataError};
use sight_service::{HookError, KeyDecl, Service, ServiceContext};

const ARRAY: &str = "array";

/// Bytes written between two progress reports
const CHUNK: usize = 64 * 1024;

#[derive(Debug, Default)]
pub struct FillService {
    value: u8,
    size: Option<usize>,
}

impl Service for FillService {
    fn keys(&self) -> Vec<KeyDecl> {
        vec![KeyDecl::inout(ARRAY)]
    }

    fn configuring(&mut self, ctx: &ServiceContext) -> Result<(), HookError> {
        let params = ctx.params();
        self.value = match params.get("value") {
            None => 0,
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| format!("`value` must be a byte: {e}"))?,
        };
        self.size = match params.get("size") {
            None => None,
            Some(size) => Some(
                serde_json::from_value(size.clone()).map_err(|e| format!("`size` must be a length: {e}"))?,
            ),
        };
        Ok(())
    }

    fn starting(&mut self, _ctx: &ServiceContext) -> Result<(), HookError> {
        Ok(())
    }

    fn updating(&mut self, ctx: &ServiceContext) -> Result<(), HookError> {
        let object = ctx.require(ARRAY)?;
        let found = object.class_name();

        let job = {
            let mut lock = object.write_lock()?;
            let array = lock.get_mut::<Array>().ok_or_else(|| DataError::TypeMismatch {
                expected: Array::CLASS.to_string(),
                found: found.to_string(),
            })?;
            if let Some(size) = self.size {
                array.resize(size)?;
            }

            let job = ctx.start_job("fill", array.len() as u64);
            job.run();
            let mut bytes = array.bytes_mut()?;
            for chunk in bytes.chunks_mut(CHUNK) {
                if job.is_canceled() {
                    break;
                }
                chunk.fill(self.value);
                job.add_done_work(chunk.len() as u64);
            }
            job
        };
        job.finish();

        if job.is_canceled() {
            tracing::info!(service_id = %ctx.id(), object = %object.id(), "Fill canceled");
            return Ok(());
        }
        object.notify_modified();
        Ok(())
    }

    fn stopping(&mut self, _ctx: &ServiceContext) -> Result<(), HookError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sight_com::JobState;
    use sight_data::{Integer, Object};
    use sight_service::{ObjectServiceRegistry, ServiceConfig, ServiceError, ServiceHandle};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fill(params: ServiceConfig) -> ServiceHandle {
        let handle = ServiceHandle::new(Box::new(FillService::default()), ObjectServiceRegistry::new_shared());
        handle.configure(params).unwrap();
        handle.start().unwrap();
        handle
    }

    #[test]
    fn test_fill_resizes_and_notifies() {
        let array = Object::new(Array::zeroed(4));
        let modified = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&modified);
        let slot = sight_com::Slot::new(move |()| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let _connection = array.modified().connect(&slot, Default::default());

        let handle = fill(
            ServiceConfig::new()
                .with_param("value", 9)
                .with_param("size", 10)
                .bind(ARRAY, array.clone()),
        );
        handle.update().unwrap();

        let lock = array.read_lock().unwrap();
        let bytes = lock.get::<Array>().unwrap().bytes().unwrap();
        assert_eq!(&*bytes, &[9u8; 10][..]);
        assert_eq!(modified.load(Ordering::SeqCst), 1);

        let job = handle.current_job().unwrap();
        assert_eq!(job.state(), JobState::Finished);
        assert_eq!(job.done_work(), 10);
    }

    #[test]
    fn test_value_out_of_range_is_rejected() {
        let handle = ServiceHandle::new(Box::new(FillService::default()), ObjectServiceRegistry::new_shared());
        let err = handle
            .configure(ServiceConfig::new().with_param("value", 300))
            .unwrap_err();
        assert!(matches!(err, ServiceError::Configuration { .. }));
    }

    #[test]
    fn test_wrong_kind_fails_the_update() {
        let handle = fill(ServiceConfig::new().bind(ARRAY, Object::new(Integer::new(1))));
        let err = handle.update().unwrap_err();
        assert!(matches!(err, ServiceError::Update { .. }));
        assert!(handle.is_started());
    }
}
