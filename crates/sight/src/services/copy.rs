// Copy Service - publishes a deep copy of its source object
//
// The copy is taken on every update, or once at start with `mode = "start"`.

use sight_service::{HookError, KeyDecl, Service, ServiceContext};

const SOURCE: &str = "source";
const TARGET: &str = "target";

/// When the copy is taken
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum CopyMode {
    #[default]
    OnUpdate,
    OnStart,
}

#[derive(Debug, Default)]
pub struct CopyService {
    mode: CopyMode,
}

impl CopyService {
    fn copy(&self, ctx: &ServiceContext) -> Result<(), HookError> {
        let source = ctx.require(SOURCE)?;
        let copy = source.duplicate()?;
        tracing::debug!(service_id = %ctx.id(), source = %source.id(), copy = %copy.id(), "Object copied");
        ctx.set_output(TARGET, Some(copy))?;
        Ok(())
    }
}

impl Service for CopyService {
    fn keys(&self) -> Vec<KeyDecl> {
        vec![KeyDecl::input(SOURCE), KeyDecl::output(TARGET)]
    }

    fn configuring(&mut self, ctx: &ServiceContext) -> Result<(), HookError> {
        self.mode = match ctx.get_config_string("mode").as_deref() {
            None | Some("update") => CopyMode::OnUpdate,
            Some("start") => CopyMode::OnStart,
            Some(other) => return Err(format!("unknown copy mode '{other}'").into()),
        };
        Ok(())
    }

    fn starting(&mut self, ctx: &ServiceContext) -> Result<(), HookError> {
        if self.mode == CopyMode::OnStart {
            self.copy(ctx)?;
        }
        Ok(())
    }

    fn updating(&mut self, ctx: &ServiceContext) -> Result<(), HookError> {
        if self.mode == CopyMode::OnUpdate {
            self.copy(ctx)?;
        }
        Ok(())
    }

    fn stopping(&mut self, _ctx: &ServiceContext) -> Result<(), HookError> {
        Ok(())
    }
}
