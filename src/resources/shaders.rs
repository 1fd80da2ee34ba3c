//! Primary hit shader variants

use std::sync::Arc;

use crate::core::error::ResourceError;
use crate::core::id::instance_name;
use crate::gpu::{BlasInstanceData, GraphicsDevice, ShaderDesc, ShaderModule, ShaderStage};
use crate::pool::{Checkout, PoolConfig, PooledResource, ResourcePool};
use crate::registry::HitGroupBinder;
use crate::stream::TaskPool;

/// Compile-time configuration of the primary hit shader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderVariant {
    pub num_textures: u32,
    pub num_lights: u32,
}

/// Names of the hit groups one shader variant registers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HitGroups {
    pub primary: String,
    pub shadow: String,
}

/// Compiled closest-hit, any-hit and shadow any-hit modules of one variant
pub struct PrimaryHitShader {
    variant: ShaderVariant,
    closest_hit: ShaderModule,
    any_hit: ShaderModule,
    shadow_any_hit: ShaderModule,
    hit_groups: HitGroups,
    device: Arc<dyn GraphicsDevice>,
}

impl PrimaryHitShader {
    /// Compile all modules of `variant`. Blocking.
    pub fn compile(variant: ShaderVariant, device: Arc<dyn GraphicsDevice>) -> Result<Self, ResourceError> {
        let macros = [
            ("NUM_TEXTURES", variant.num_textures.to_string()),
            ("NUM_LIGHTS", variant.num_lights.to_string()),
        ];
        let compile = |name: &str, stage: ShaderStage, entry_point: &str| {
            device
                .create_shader(&ShaderDesc {
                    name,
                    stage,
                    entry_point,
                    macros: &macros,
                })
                .map_err(|e| ResourceError::new(variant, e.to_string()))
        };

        let closest_hit = compile("primary ray closest hit", ShaderStage::ClosestHit, "main")?;
        let any_hit = match compile("primary ray any hit", ShaderStage::AnyHit, "main") {
            Ok(module) => module,
            Err(err) => {
                device.release(closest_hit.0);
                return Err(err);
            }
        };
        let shadow_any_hit = match compile("shadow ray any hit", ShaderStage::AnyHit, "main") {
            Ok(module) => module,
            Err(err) => {
                device.release(closest_hit.0);
                device.release(any_hit.0);
                return Err(err);
            }
        };

        let group = instance_name("PrimaryHit");
        log::debug!("Compiled primary hit shader {:?} as {}", variant, group);
        Ok(Self {
            variant,
            closest_hit,
            any_hit,
            shadow_any_hit,
            hit_groups: HitGroups {
                shadow: format!("{group}Shadow"),
                primary: group,
            },
            device,
        })
    }

    pub fn variant(&self) -> ShaderVariant {
        self.variant
    }

    pub fn hit_groups(&self) -> &HitGroups {
        &self.hit_groups
    }

    pub fn modules(&self) -> [ShaderModule; 3] {
        [self.closest_hit, self.any_hit, self.shadow_any_hit]
    }

    /// Binder writing `record` for `instance_name` under both hit groups
    pub fn binder(&self, instance_name: &str, record: BlasInstanceData) -> HitGroupBinder {
        HitGroupBinder {
            instance_name: instance_name.to_string(),
            primary_hit_group: self.hit_groups.primary.clone(),
            shadow_hit_group: self.hit_groups.shadow.clone(),
            record,
        }
    }
}

impl Drop for PrimaryHitShader {
    fn drop(&mut self) {
        for module in self.modules() {
            self.device.release(module.0);
        }
    }
}

/// Handle to a pooled shader variant
pub type ShaderHandle = PooledResource<ShaderVariant, PrimaryHitShader>;

/// Hands out the scene's primary hit shader, compiling it on first use.
#[derive(Clone)]
pub struct PrimaryHitShaderFactory {
    pool: ResourcePool<ShaderVariant, PrimaryHitShader>,
    device: Arc<dyn GraphicsDevice>,
    variant: ShaderVariant,
}

impl PrimaryHitShaderFactory {
    pub fn new(tasks: TaskPool, config: PoolConfig, device: Arc<dyn GraphicsDevice>, variant: ShaderVariant) -> Self {
        Self {
            pool: ResourcePool::new("shaders", tasks, config),
            device,
            variant,
        }
    }

    /// Check out the configured variant.
    pub fn checkout(&self) -> Checkout<ShaderVariant, PrimaryHitShader> {
        self.checkout_variant(self.variant)
    }

    pub fn checkout_variant(&self, variant: ShaderVariant) -> Checkout<ShaderVariant, PrimaryHitShader> {
        let device = Arc::clone(&self.device);
        self.pool.checkout(variant, move |variant| async move {
            tokio::task::spawn_blocking(move || PrimaryHitShader::compile(variant, device))
                .await
                .map_err(|e| ResourceError::new(variant, format!("shader compile task failed: {e}")))?
        })
    }

    pub fn return_handle(&self, handle: ShaderHandle) {
        self.pool.return_handle(handle);
    }

    pub fn try_return(&self, handle: Option<ShaderHandle>) {
        self.pool.try_return(handle);
    }

    pub fn variant(&self) -> ShaderVariant {
        self.variant
    }

    pub fn pool(&self) -> &ResourcePool<ShaderVariant, PrimaryHitShader> {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::headless::{DeviceEvent, ObjectKind};
    use crate::gpu::HeadlessDevice;

    const VARIANT: ShaderVariant = ShaderVariant { num_textures: 100, num_lights: 1 };

    #[test]
    fn test_compile_creates_three_modules() {
        let device = Arc::new(HeadlessDevice::new());
        let shader = PrimaryHitShader::compile(VARIANT, device.clone()).unwrap();
        assert_eq!(device.live_count(ObjectKind::Shader), 3);
        assert!(shader.hit_groups().shadow.starts_with(&shader.hit_groups().primary));

        drop(shader);
        assert_eq!(device.live_count(ObjectKind::Shader), 0);
    }

    #[test]
    fn test_compile_failure_is_reported() {
        let device = Arc::new(HeadlessDevice::new());
        device.set_fail_shaders(true);
        let err = PrimaryHitShader::compile(VARIANT, device.clone()).err().unwrap();
        assert!(err.message.contains("failed to compile"));
        assert_eq!(device.count_events(|e| matches!(e, DeviceEvent::CreateShader { .. })), 0);
    }

    #[tokio::test]
    async fn test_factory_compiles_variant_once() {
        let device = Arc::new(HeadlessDevice::new());
        let factory = PrimaryHitShaderFactory::new(TaskPool::current().unwrap(), PoolConfig::default(), device.clone(), VARIANT);

        let a = factory.checkout().await.unwrap();
        let b = factory.checkout().await.unwrap();
        assert_eq!(a.hit_groups(), b.hit_groups());
        assert_eq!(factory.pool().stats().constructions, 1);

        factory.return_handle(a);
        factory.return_handle(b);
        assert_eq!(device.live_count(ObjectKind::Shader), 0);
    }
}
