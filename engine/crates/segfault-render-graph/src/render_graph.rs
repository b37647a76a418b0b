use itertools::Itertools;
use segfault_gfx::{DrawCommand, GfxError, GfxResult, Rhi, RhiState};

/// 一帧中需要执行的 draw commands
///
/// 目前只是一个有序的列表：不做依赖分析，也不做重排序，按插入顺序提交给 RHI
#[derive(Clone, Debug, Default)]
pub struct RenderGraph {
    commands: Vec<DrawCommand>,
}

// 构建过程
impl RenderGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// 返回 command 在 graph 中的位置
    pub fn add_command(&mut self, command: DrawCommand) -> usize {
        self.commands.push(command);
        self.commands.len() - 1
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }
}

// getters
impl RenderGraph {
    #[inline]
    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

// 执行
impl RenderGraph {
    /// 按插入顺序将所有 command 提交给 RHI
    ///
    /// graph 本身不会被修改，每一帧都可以重复执行
    pub fn execute(&self, rhi: &mut Rhi) -> GfxResult<()> {
        if rhi.state() != RhiState::SwapchainReady {
            return Err(GfxError::InvalidState {
                op: "render_graph_execute",
                state: rhi.state(),
            });
        }

        for command in &self.commands {
            rhi.submit_draw(command)?;
        }
        log::trace!(
            "render graph submitted {} command(s), pipelines: {:?}",
            self.commands.len(),
            self.commands.iter().map(|c| c.pipeline_state.pipeline.0).unique().collect_vec()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use segfault_crate_tools::log_sink::CaptureSink;
    use segfault_gfx::backend::headless::{HeadlessBackend, HeadlessProbe};
    use segfault_gfx::{FrameStatus, HeadlessSurface, PipelineHandle, RhiConfig};

    use super::*;

    fn ready_rhi() -> (Rhi, HeadlessProbe) {
        let backend = HeadlessBackend::default();
        let probe = backend.probe();
        let config = RhiConfig {
            enable_validation: false,
            ..Default::default()
        };
        let mut rhi = Rhi::new(Box::new(backend), config, CaptureSink::new());
        rhi.init("render-graph-test", Arc::new(HeadlessSurface::new(400, 300))).unwrap();
        (rhi, probe)
    }

    fn graph_with(n: u32) -> RenderGraph {
        let mut graph = RenderGraph::new();
        for i in 0..n {
            graph.add_command(DrawCommand::draw(3 * (i + 1), 1).with_pipeline(PipelineHandle(u64::from(i % 4))));
        }
        graph
    }

    #[test]
    fn test_empty_graph_submits_nothing() {
        let (mut rhi, probe) = ready_rhi();
        let graph = RenderGraph::new();
        assert!(graph.is_empty());

        graph.execute(&mut rhi).unwrap();
        assert!(rhi.pending_draws().is_empty());
        assert_eq!(rhi.draw_frame().unwrap(), FrameStatus::Idle);
        assert!(probe.frames().is_empty());
    }

    #[test]
    fn test_single_command() {
        let (mut rhi, probe) = ready_rhi();
        let graph = graph_with(1);

        graph.execute(&mut rhi).unwrap();
        assert_eq!(rhi.draw_frame().unwrap(), FrameStatus::Presented);
        assert_eq!(probe.frames(), vec![graph.commands().to_vec()]);
    }

    #[test]
    fn test_many_commands_keep_insertion_order() {
        let (mut rhi, probe) = ready_rhi();
        let graph = graph_with(64);
        assert_eq!(graph.len(), 64);

        graph.execute(&mut rhi).unwrap();
        assert_eq!(rhi.pending_draws(), graph.commands());
        rhi.draw_frame().unwrap();

        let submitted = probe.submitted();
        assert_eq!(submitted, graph.commands());
        assert!(submitted.windows(2).all(|w| w[0].num_vertices < w[1].num_vertices));
    }

    #[test]
    fn test_graph_is_reusable_across_frames() {
        let (mut rhi, probe) = ready_rhi();
        let graph = graph_with(3);

        for _ in 0..2 {
            graph.execute(&mut rhi).unwrap();
            rhi.draw_frame().unwrap();
        }
        let frames = probe.frames();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], frames[1]);
        assert_eq!(rhi.frame_index(), 2);
    }

    #[test]
    fn test_execute_requires_swapchain() {
        let mut rhi = Rhi::new(Box::new(HeadlessBackend::default()), RhiConfig::default(), CaptureSink::new());
        let graph = graph_with(2);
        assert!(matches!(
            graph.execute(&mut rhi),
            Err(GfxError::InvalidState {
                state: RhiState::Uninitialized,
                ..
            })
        ));
    }

    #[test]
    fn test_add_and_clear() {
        let mut graph = RenderGraph::new();
        assert_eq!(graph.add_command(DrawCommand::draw(3, 1)), 0);
        assert_eq!(graph.add_command(DrawCommand::draw_indexed(6, 1)), 1);
        assert!(graph.commands()[1].is_indexed());

        graph.clear();
        assert!(graph.is_empty());
        assert_eq!(graph.len(), 0);
    }
}
