//! Integration tests for the built-in RTX 5090 patch set against a mock
//! Wan2GP checkout.

mod rtx5090_patches;

use std::fs;
use std::path::Path;
use tempfile::TempDir;

pub const WGP_PY: &str = r##"import torch
from mmgp import offload

server_config = {}
compile = server_config.get("compile", "")
vae_config = server_config.get("vae_config", 0)

comp_map = {
    "vace": ["vace_14B", "vace_1.3B" "vace_multitalk_14B"],
}

def create_parser(parser):
    parser.add_argument("--reserved-mem", type=float, help="% of RAM allocated to Reserved RAM")

def unload(trans, trans2):
    if trans is not None: offload.unload_loras_from_model(trans)
    if trans is not None: offload.unload_loras_from_model(trans2)
"##;

pub const T5_PY: &str = r##"import logging
import torch

class T5EncoderModel:
    def __init__(self, checkpoint_path, device):
        model = umt5_xxl()
        from mmgp import offload
        offload.load_model_data(model,checkpoint_path, writable_tensors= False )
        self.model = model
"##;

pub const CLIP_PY: &str = r##"import logging

class CLIPModel:
    def __init__(self, checkpoint_path, device):
        self.device = device
        self.model = clip_xlm_roberta_vit_h_14()
        # self.model.load_state_dict(
        #     torch.load(checkpoint_path, map_location='cpu'), assign= True)
        offload.load_model_data(self.model, checkpoint_path.replace(".pth", "-bf16.safetensors"), writable_tensors= False)
        self.model.eval()
"##;

pub const VAE_PY: &str = r##"import logging

def _video_vae(pretrained_path=None, device='cpu'):
    model = WanVAE_()
    from mmgp import offload
    # offload.load_model_data(model, pretrained_path.replace(".pth", "_bf16.safetensors"), writable_tensors= False)
    offload.load_model_data(model, pretrained_path.replace(".pth", ".safetensors"), writable_tensors= False)
    return model
"##;

pub fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

pub fn read(root: &Path, rel: &str) -> String {
    fs::read_to_string(root.join(rel)).unwrap()
}

/// Mock Wan2GP checkout with every file the built-in set targets.
pub fn setup_mock_wan2gp() -> TempDir {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "wgp.py", WGP_PY);
    write(dir.path(), "wan/modules/t5.py", T5_PY);
    write(dir.path(), "wan/modules/clip.py", CLIP_PY);
    write(dir.path(), "wan/modules/vae.py", VAE_PY);
    dir
}
