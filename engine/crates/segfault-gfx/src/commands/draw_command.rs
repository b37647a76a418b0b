//! 描述"画什么"的值类型
//!
//! 这些类型只是描述符，不持有任何 GPU 资源，可以随意 clone 并在线程之间传递。

/// 资源的全局唯一 id
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Guid(pub u64);

/// 指向一份管线配置的句柄
///
/// 0 表示默认管线
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct PipelineHandle(pub u64);

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct RenderPipelineState {
    pub pipeline: PipelineHandle,
}

impl RenderPipelineState {
    pub fn new(pipeline: PipelineHandle) -> Self {
        Self { pipeline }
    }
}

/// 一段 GPU buffer 的引用
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct RenderBuffer {
    pub id: Guid,
    pub size: u32,
    pub stride: u32,
    pub offset: u32,
}

impl RenderBuffer {
    pub fn new(id: Guid, size: u32, stride: u32) -> Self {
        Self {
            id,
            size,
            stride,
            offset: 0,
        }
    }

    /// buffer 中元素的数量，stride 为 0 时返回 0
    #[inline]
    pub fn element_count(&self) -> u32 {
        (self.size - self.offset.min(self.size)).checked_div(self.stride).unwrap_or(0)
    }
}

/// 一次 draw call 的描述
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct DrawCommand {
    pub pipeline_state: RenderPipelineState,
    pub vertex_buffer: Option<RenderBuffer>,

    pub num_vertices: u32,
    pub num_instances: u32,
    pub vertex_offset: u32,
    pub instance_offset: u32,
    /// 大于 0 时表示 indexed draw
    pub index_count: u32,
}

// 构建过程
impl DrawCommand {
    /// 非 indexed 的 draw call
    pub fn draw(num_vertices: u32, num_instances: u32) -> Self {
        Self {
            num_vertices,
            num_instances,
            ..Default::default()
        }
    }

    /// indexed draw call
    pub fn draw_indexed(index_count: u32, num_instances: u32) -> Self {
        Self {
            index_count,
            num_instances,
            ..Default::default()
        }
    }

    #[inline]
    pub fn with_offsets(mut self, vertex_offset: u32, instance_offset: u32) -> Self {
        self.vertex_offset = vertex_offset;
        self.instance_offset = instance_offset;
        self
    }

    #[inline]
    pub fn with_pipeline(mut self, pipeline: PipelineHandle) -> Self {
        self.pipeline_state = RenderPipelineState::new(pipeline);
        self
    }

    #[inline]
    pub fn with_vertex_buffer(mut self, buffer: RenderBuffer) -> Self {
        self.vertex_buffer = Some(buffer);
        self
    }
}

// getters
impl DrawCommand {
    #[inline]
    pub fn is_indexed(&self) -> bool {
        self.index_count > 0
    }

    /// 不会产生任何图元的 draw call
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.num_instances == 0 || (self.num_vertices == 0 && self.index_count == 0)
    }
}
