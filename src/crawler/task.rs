use anyhow::Result;
use tokio::task::JoinSet;

// JoinSet 被丢弃时会中止其中所有未完成的任务，
// 所以 wait 遇到第一个错误直接返回即可让整批任务失败
pub struct TaskManager<R: Send + 'static> {
    tasks: JoinSet<Result<R>>,
}

impl<R: Send + 'static> Default for TaskManager<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Send + 'static> TaskManager<R> {
    pub fn new() -> Self {
        Self {
            tasks: JoinSet::new(),
        }
    }

    pub fn spawn<F>(&mut self, future: F)
    where
        F: std::future::Future<Output = Result<R>> + Send + 'static,
    {
        self.tasks.spawn(future);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// 按完成顺序收集结果，顺序没有意义
    pub async fn wait(mut self) -> Result<Vec<R>> {
        let mut results = Vec::with_capacity(self.tasks.len());
        while let Some(res) = self.tasks.join_next().await {
            results.push(res??);
        }
        Ok(results)
    }
}
